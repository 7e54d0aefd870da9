//! Prior configurations for the Weibull survival model.
//!
//! A [`PriorConfiguration`] assigns one [`PriorSpec`] to each parameter class
//! (regression coefficients, the Weibull shape and the intercept). The shape
//! prior must put all its mass on non-negative values.

use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use crate::error::PriorError;

/// Parameter classes that carry a prior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterClass {
    Coefficient,
    Shape,
    Intercept,
}

impl ParameterClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterClass::Coefficient => "coefficient",
            ParameterClass::Shape => "shape",
            ParameterClass::Intercept => "intercept",
        }
    }
}

/// Distribution family with its hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum PriorFamily {
    /// Improper uniform density.
    Flat,
    Normal { location: f64, scale: f64 },
    StudentT { df: f64, location: f64, scale: f64 },
    Cauchy { location: f64, scale: f64 },
    /// Shape/rate parameterization.
    Gamma { shape: f64, rate: f64 },
    Exponential { rate: f64 },
}

/// Prior for one parameter class: a family plus an optional lower bound
/// (a truncated family, e.g. a half-normal when the bound is zero).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorSpec {
    #[serde(flatten)]
    pub family: PriorFamily,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<f64>,
}

impl PriorSpec {
    pub fn new(family: PriorFamily) -> Self {
        Self {
            family,
            lower_bound: None,
        }
    }

    pub fn normal(location: f64, scale: f64) -> Self {
        Self::new(PriorFamily::Normal { location, scale })
    }

    pub fn student_t(df: f64, location: f64, scale: f64) -> Self {
        Self::new(PriorFamily::StudentT { df, location, scale })
    }

    pub fn gamma(shape: f64, rate: f64) -> Self {
        Self::new(PriorFamily::Gamma { shape, rate })
    }

    pub fn exponential(rate: f64) -> Self {
        Self::new(PriorFamily::Exponential { rate })
    }

    pub fn with_lower_bound(mut self, bound: f64) -> Self {
        self.lower_bound = Some(bound);
        self
    }

    /// Smallest value with positive density.
    pub fn support_min(&self) -> f64 {
        let family_min = match self.family {
            PriorFamily::Gamma { .. } | PriorFamily::Exponential { .. } => 0.0,
            _ => f64::NEG_INFINITY,
        };
        self.lower_bound.map_or(family_min, |b| b.max(family_min))
    }

    /// Log density up to an additive constant that does not depend on `x`.
    pub fn log_density(&self, x: f64) -> f64 {
        if x < self.support_min() {
            return f64::NEG_INFINITY;
        }
        match self.family {
            PriorFamily::Flat => 0.0,
            PriorFamily::Normal { location, scale } => {
                let z = (x - location) / scale;
                -0.5 * z * z - scale.ln()
            }
            PriorFamily::StudentT { df, location, scale } => {
                let z = (x - location) / scale;
                ln_gamma((df + 1.0) / 2.0)
                    - ln_gamma(df / 2.0)
                    - 0.5 * (df * std::f64::consts::PI).ln()
                    - scale.ln()
                    - (df + 1.0) / 2.0 * (1.0 + z * z / df).ln()
            }
            PriorFamily::Cauchy { location, scale } => {
                let z = (x - location) / scale;
                -(1.0 + z * z).ln() - scale.ln()
            }
            PriorFamily::Gamma { shape, rate } => {
                if x <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                shape * rate.ln() - ln_gamma(shape) + (shape - 1.0) * x.ln() - rate * x
            }
            PriorFamily::Exponential { rate } => rate.ln() - rate * x,
        }
    }

    /// Derivative of [`Self::log_density`] with respect to `x`.
    pub fn grad_log_density(&self, x: f64) -> f64 {
        match self.family {
            PriorFamily::Flat => 0.0,
            PriorFamily::Normal { location, scale } => -(x - location) / (scale * scale),
            PriorFamily::StudentT { df, location, scale } => {
                let d = x - location;
                -(df + 1.0) * d / (df * scale * scale + d * d)
            }
            PriorFamily::Cauchy { location, scale } => {
                let d = x - location;
                -2.0 * d / (scale * scale + d * d)
            }
            PriorFamily::Gamma { shape, rate } => (shape - 1.0) / x - rate,
            PriorFamily::Exponential { rate } => -rate,
        }
    }

    fn validate(&self, class: ParameterClass) -> Result<(), PriorError> {
        let name = class.as_str();
        let positive = |value: f64, what: &str| -> Result<(), PriorError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(PriorError::InvalidHyperparameter {
                    class: name,
                    reason: format!("{what} must be positive, found {value}"),
                })
            }
        };
        match self.family {
            PriorFamily::Flat => {}
            PriorFamily::Normal { scale, .. } | PriorFamily::Cauchy { scale, .. } => {
                if !(scale.is_finite() && scale > 0.0) {
                    return Err(PriorError::NonPositiveScale { class: name, scale });
                }
            }
            PriorFamily::StudentT { df, scale, .. } => {
                positive(df, "df")?;
                if !(scale.is_finite() && scale > 0.0) {
                    return Err(PriorError::NonPositiveScale { class: name, scale });
                }
            }
            PriorFamily::Gamma { shape, rate } => {
                positive(shape, "shape")?;
                positive(rate, "rate")?;
            }
            PriorFamily::Exponential { rate } => positive(rate, "rate")?,
        }
        if class == ParameterClass::Shape && self.support_min() < 0.0 {
            return Err(PriorError::ShapeSupport);
        }
        Ok(())
    }
}

/// Priors for every parameter class of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorConfiguration {
    /// Label used in reports and sensitivity tables.
    pub name: String,
    pub coefficient: PriorSpec,
    pub shape: PriorSpec,
    pub intercept: PriorSpec,
}

impl PriorConfiguration {
    /// Builds a configuration, rejecting invalid hyperparameters and shape
    /// priors with negative support.
    pub fn new(
        name: &str,
        coefficient: PriorSpec,
        shape: PriorSpec,
        intercept: PriorSpec,
    ) -> Result<Self, PriorError> {
        let config = Self {
            name: name.to_string(),
            coefficient,
            shape,
            intercept,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every class. Configurations deserialized from files go through
    /// this before use.
    pub fn validate(&self) -> Result<(), PriorError> {
        self.coefficient.validate(ParameterClass::Coefficient)?;
        self.shape.validate(ParameterClass::Shape)?;
        self.intercept.validate(ParameterClass::Intercept)
    }

    pub fn get(&self, class: ParameterClass) -> &PriorSpec {
        match class {
            ParameterClass::Coefficient => &self.coefficient,
            ParameterClass::Shape => &self.shape,
            ParameterClass::Intercept => &self.intercept,
        }
    }

    /// Weakly informative defaults.
    pub fn default_priors() -> Self {
        Self {
            name: "default".to_string(),
            coefficient: PriorSpec::normal(0.0, 5.0),
            shape: PriorSpec::gamma(0.01, 0.01),
            intercept: PriorSpec::student_t(3.0, 0.0, 10.0),
        }
    }

    /// Coefficients shrunk towards zero, shape centred on an exponential model.
    pub fn informative() -> Self {
        Self {
            name: "informative".to_string(),
            coefficient: PriorSpec::normal(0.0, 1.0),
            shape: PriorSpec::gamma(2.0, 2.0),
            intercept: PriorSpec::normal(3.0, 2.0),
        }
    }

    /// Nearly flat priors.
    pub fn vague() -> Self {
        Self {
            name: "vague".to_string(),
            coefficient: PriorSpec::normal(0.0, 100.0),
            shape: PriorSpec::exponential(0.01),
            intercept: PriorSpec::normal(0.0, 100.0),
        }
    }
}

impl Default for PriorConfiguration {
    fn default() -> Self {
        Self::default_priors()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for config in [
            PriorConfiguration::default_priors(),
            PriorConfiguration::informative(),
            PriorConfiguration::vague(),
        ] {
            config.validate().unwrap();
        }
    }

    #[test]
    fn unbounded_shape_prior_is_rejected() {
        let err = PriorConfiguration::new(
            "bad",
            PriorSpec::normal(0.0, 1.0),
            PriorSpec::normal(1.0, 1.0),
            PriorSpec::normal(0.0, 10.0),
        )
        .unwrap_err();
        assert_eq!(err, PriorError::ShapeSupport);
    }

    #[test]
    fn half_normal_shape_prior_is_accepted() {
        PriorConfiguration::new(
            "half-normal",
            PriorSpec::normal(0.0, 1.0),
            PriorSpec::normal(0.0, 2.0).with_lower_bound(0.0),
            PriorSpec::normal(0.0, 10.0),
        )
        .unwrap();
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let specs = [
            PriorSpec::normal(0.5, 2.0),
            PriorSpec::student_t(3.0, 0.0, 2.5),
            PriorSpec::gamma(2.0, 1.5),
            PriorSpec::new(PriorFamily::Cauchy {
                location: 0.0,
                scale: 1.0,
            }),
        ];
        let h = 1e-6;
        for spec in specs {
            let x = 1.3;
            let fd = (spec.log_density(x + h) - spec.log_density(x - h)) / (2.0 * h);
            assert!((fd - spec.grad_log_density(x)).abs() < 1e-5, "{spec:?}");
        }
    }

    #[test]
    fn toml_round_trip_keeps_lower_bound() {
        let spec = PriorSpec::normal(0.0, 1.0).with_lower_bound(0.0);
        let text = toml::to_string(&spec).unwrap();
        let back: PriorSpec = toml::from_str(&text).unwrap();
        assert_eq!(back, spec);
    }
}
