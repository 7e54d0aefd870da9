//! Posterior summaries and hazard ratios.
//!
//! Coefficients act on the log scale of survival time, so a positive
//! coefficient lowers the hazard. The hazard ratio of a coefficient is
//! `exp(-coef)`, and the interval bounds swap under the inversion. That
//! mapping lives in one place, [`hazard_ratio`].

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::draws::{PosteriorDrawSet, INTERCEPT, SHAPE};
use crate::math::{mean, quantile_sorted, sample_variance, sorted};

/// Lower and upper interval probabilities.
pub const INTERVAL: (f64, f64) = (0.025, 0.975);

/// Marginal posterior summary of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub median: f64,
    pub sd: f64,
    /// 2.5th percentile.
    pub lower: f64,
    /// 97.5th percentile.
    pub upper: f64,
    /// Posterior probability that the parameter is positive.
    pub prob_positive: f64,
}

impl ParameterSummary {
    /// Summarizes pooled draws of one parameter.
    pub fn from_draws(name: &str, values: &[f64]) -> Self {
        let s = sorted(values);
        let positive = values.iter().filter(|&&v| v > 0.0).count();
        Self {
            name: name.to_string(),
            mean: mean(values),
            median: quantile_sorted(&s, 0.5),
            sd: sample_variance(values).sqrt(),
            lower: quantile_sorted(&s, INTERVAL.0),
            upper: quantile_sorted(&s, INTERVAL.1),
            prob_positive: if values.is_empty() {
                f64::NAN
            } else {
                positive as f64 / values.len() as f64
            },
        }
    }
}

/// Hazard-scale view of a coefficient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardRatioSummary {
    pub name: String,
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Maps a coefficient summary to the hazard scale.
///
/// `HR = exp(-mean)`, `lower = exp(-upper_q)`, `upper = exp(-lower_q)`.
///
/// A posterior mean outside its own 95% interval (possible only for extremely
/// skewed draws) widens the interval to contain it, so `lower <= mean <= upper`
/// always holds.
pub fn hazard_ratio(coefficient: &ParameterSummary) -> HazardRatioSummary {
    let mean = (-coefficient.mean).exp();
    HazardRatioSummary {
        name: coefficient.name.clone(),
        mean,
        lower: (-coefficient.upper).exp().min(mean),
        upper: (-coefficient.lower).exp().max(mean),
    }
}

/// Summaries for every parameter of a draw set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSummary {
    /// In draw-set column order.
    pub parameters: Vec<ParameterSummary>,
    /// One entry per regression coefficient, same order as `parameters`.
    pub hazard_ratios: Vec<HazardRatioSummary>,
    /// Set when the draws failed convergence checks.
    pub low_confidence: bool,
}

impl PosteriorSummary {
    pub fn from_draws(draws: &PosteriorDrawSet, low_confidence: bool) -> Self {
        let parameters: Vec<ParameterSummary> = draws
            .parameter_names()
            .iter()
            .enumerate()
            .map(|(idx, name)| ParameterSummary::from_draws(name, &draws.pooled_column(idx)))
            .collect();
        let hazard_ratios = parameters
            .iter()
            .filter(|p| p.name != SHAPE && p.name != INTERCEPT)
            .map(hazard_ratio)
            .collect();
        Self {
            parameters,
            hazard_ratios,
            low_confidence,
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSummary> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn hazard_ratio(&self, name: &str) -> Option<&HazardRatioSummary> {
        self.hazard_ratios.iter().find(|h| h.name == name)
    }

    /// Parameters sorted by descending absolute mean, for presentation.
    pub fn by_magnitude(&self) -> Vec<&ParameterSummary> {
        let mut rows: Vec<&ParameterSummary> = self.parameters.iter().collect();
        rows.sort_by(|a, b| {
            b.mean
                .abs()
                .partial_cmp(&a.mean.abs())
                .unwrap_or(Ordering::Equal)
        });
        rows
    }
}
