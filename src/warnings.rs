//! Structured, non-fatal findings attached to pipeline results.

use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

/// A condition that does not abort a stage but must be reported with its
/// result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// Sampler output did not meet the R-hat / ESS bar; summaries computed
    /// from it are low-confidence.
    Convergence {
        max_rhat: f64,
        min_ess: f64,
        max_rhat_allowed: f64,
        min_ess_required: f64,
        /// Parameters that failed either check.
        parameters: Vec<String>,
    },
    /// Observed and predicted survival fractions disagree at a horizon.
    Calibration {
        horizon: f64,
        observed: f64,
        predicted: f64,
        tolerance: f64,
    },
    /// Predicted survival time lies far beyond the observed follow-up.
    Extrapolation {
        profile: String,
        median_time: f64,
        training_max: f64,
    },
    /// PSIS-LOO found observations with unreliable importance weights.
    ParetoK {
        configuration: String,
        bad: usize,
        total: usize,
    },
}

impl PipelineWarning {
    /// Emits the warning through the `log` facade and hands it back.
    pub fn raise(self) -> Self {
        warn!("{self}");
        self
    }
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PipelineWarning::Convergence {
                max_rhat,
                min_ess,
                max_rhat_allowed,
                min_ess_required,
                parameters,
            } => write!(
                f,
                "convergence: max R-hat {max_rhat:.4} (< {max_rhat_allowed} required), min ESS {min_ess:.0} (>= {min_ess_required} required); affected: {}",
                parameters.join(", ")
            ),
            PipelineWarning::Calibration {
                horizon,
                observed,
                predicted,
                tolerance,
            } => write!(
                f,
                "calibration: at {horizon} months observed survival {observed:.3} vs predicted {predicted:.3} (|diff| > {tolerance})"
            ),
            PipelineWarning::Extrapolation {
                profile,
                median_time,
                training_max,
            } => write!(
                f,
                "extrapolation: profile '{profile}' has median survival {median_time:.1} months, beyond the {training_max:.0}-month training range"
            ),
            PipelineWarning::ParetoK {
                configuration,
                bad,
                total,
            } => write!(
                f,
                "PSIS-LOO for '{configuration}': {bad} of {total} observations have Pareto k > 0.7"
            ),
        }
    }
}
