//! Analysis configuration loaded from TOML.
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration:
//!
//! ```toml
//! churn_label = "Yes"
//! cache_dir = ".churn-cache"
//!
//! [filter]
//! threshold = 3.0
//!
//! [sampling]
//! chains = 4
//! warmup = 1000
//! iterations = 2000
//! seed = 1234
//!
//! [[sensitivity]]
//! name = "informative"
//! coefficient = { family = "normal", location = 0.0, scale = 1.0 }
//! shape = { family = "gamma", shape = 2.0, rate = 2.0 }
//! intercept = { family = "normal", location = 3.0, scale = 2.0 }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::CsvSchema;
use crate::diagnostics::DiagnosticThresholds;
use crate::error::ConfigError;
use crate::ppc::PpcSettings;
use crate::predict::PredictionSettings;
use crate::priors::PriorConfiguration;
use crate::sampler::SamplingParams;

/// Influential-observation filter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    /// Records with `|deviance residual|` above this are removed.
    pub threshold: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Churn label value that marks an observed event.
    pub churn_label: String,
    pub csv: CsvSchema,
    pub filter: FilterConfig,
    pub sampling: SamplingParams,
    pub diagnostics: DiagnosticThresholds,
    pub ppc: PpcSettings,
    pub prediction: PredictionSettings,
    /// Priors for the primary fit.
    pub priors: PriorConfiguration,
    /// Configurations compared by the sensitivity analysis.
    pub sensitivity: Vec<PriorConfiguration>,
    /// Directory for cached draw sets. No caching when unset.
    pub cache_dir: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            churn_label: "Yes".to_string(),
            csv: CsvSchema::default(),
            filter: FilterConfig::default(),
            sampling: SamplingParams::default(),
            diagnostics: DiagnosticThresholds::default(),
            ppc: PpcSettings::default(),
            prediction: PredictionSettings::default(),
            priors: PriorConfiguration::default_priors(),
            sensitivity: vec![PriorConfiguration::default_priors(), PriorConfiguration::informative()],
            cache_dir: None,
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.filter.threshold.is_finite() && self.filter.threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "filter.threshold must be positive, found {}",
                self.filter.threshold
            )));
        }
        self.sampling
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("sampling: {e}")))?;
        if self.ppc.replicates == 0 {
            return Err(ConfigError::Invalid("ppc.replicates must be positive".into()));
        }
        if self.prediction.draws == 0 {
            return Err(ConfigError::Invalid("prediction.draws must be positive".into()));
        }
        for priors in std::iter::once(&self.priors).chain(&self.sensitivity) {
            priors
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("priors '{}': {e}", priors.name)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = AnalysisConfig::from_toml_str("").unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.diagnostics.min_ess, 400.0);
        assert_eq!(config.filter.threshold, 3.0);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AnalysisConfig::from_toml_str(
            r#"
            [sampling]
            chains = 2
            seed = 99

            [filter]
            threshold = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(config.sampling.chains, 2);
        assert_eq!(config.sampling.seed, 99);
        assert_eq!(config.sampling.warmup, 1000);
        assert_eq!(config.filter.threshold, 2.5);
        assert!(config.filter.enabled);
    }

    #[test]
    fn prior_tables_parse() {
        let config = AnalysisConfig::from_toml_str(
            r#"
            [[sensitivity]]
            name = "tight"
            coefficient = { family = "normal", location = 0.0, scale = 0.5 }
            shape = { family = "gamma", shape = 2.0, rate = 2.0 }
            intercept = { family = "student_t", df = 3.0, location = 0.0, scale = 10.0 }
            "#,
        )
        .unwrap();
        assert_eq!(config.sensitivity.len(), 1);
        assert_eq!(config.sensitivity[0].name, "tight");
    }

    #[test]
    fn negative_shape_support_is_rejected() {
        let err = AnalysisConfig::from_toml_str(
            r#"
            [priors]
            name = "bad"
            coefficient = { family = "normal", location = 0.0, scale = 1.0 }
            shape = { family = "normal", location = 1.0, scale = 1.0 }
            intercept = { family = "normal", location = 0.0, scale = 10.0 }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
