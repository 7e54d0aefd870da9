//! Survival predictions for new customer profiles.
//!
//! Profiles are scaled with the parameters retained from training and
//! encoded with the training formula. For every posterior draw a survival
//! time is simulated; survival probabilities, their intervals and time
//! quantiles are read off the simulated and analytic curves. Predictions
//! beyond the observed follow-up are flagged, never clipped.

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::data::{Covariates, ScalingParams};
use crate::draws::PosteriorDrawSet;
use crate::error::{AnalysisError, ConfigError};
use crate::formula::ModelFormula;
use crate::likelihood::{sample_time, survival_probability};
use crate::math::{quantile_sorted, sorted};
use crate::warnings::PipelineWarning;

/// A new customer to score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub name: String,
    /// Raw (unscaled) covariate values.
    pub covariates: Covariates,
}

impl CustomerProfile {
    pub fn new(name: &str, covariates: Covariates) -> Self {
        Self {
            name: name.to_string(),
            covariates,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionSettings {
    /// Posterior-predictive draws per profile.
    pub draws: usize,
    /// Horizons (months) reported when the caller does not supply any.
    pub horizons: Vec<f64>,
    /// A median survival time above `extrapolation_factor * max training time`
    /// raises an extrapolation warning.
    pub extrapolation_factor: f64,
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self {
            draws: 4000,
            horizons: vec![12.0, 24.0, 36.0, 48.0, 60.0],
            extrapolation_factor: 2.0,
        }
    }
}

/// Survival probability at one horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurvivalPoint {
    pub horizon: f64,
    /// Fraction of simulated times beyond the horizon.
    pub probability: f64,
    /// 2.5th percentile of the per-draw survival probability, lowered to
    /// `probability` when the simulated fraction falls below it.
    pub lower: f64,
    /// 97.5th percentile of the per-draw survival probability, raised to
    /// `probability` when needed, so `lower <= probability <= upper`.
    pub upper: f64,
    /// The horizon lies past the longest observed training time.
    pub beyond_training: bool,
}

/// Predicted survival for one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurvivalCurve {
    pub profile: String,
    pub points: Vec<SurvivalPoint>,
    pub median_time: f64,
    pub q25_time: f64,
    pub q75_time: f64,
    /// Median survival time lies far beyond the training range.
    pub extrapolated: bool,
    pub warnings: Vec<PipelineWarning>,
}

impl SurvivalCurve {
    pub fn at(&self, horizon: f64) -> Option<&SurvivalPoint> {
        self.points.iter().find(|p| p.horizon == horizon)
    }
}

/// Scores profiles against a fitted draw set.
pub struct PredictionGenerator<'a> {
    draws: &'a PosteriorDrawSet,
    formula: &'a ModelFormula,
    scaling: &'a ScalingParams,
    training_max: f64,
    settings: PredictionSettings,
}

impl<'a> PredictionGenerator<'a> {
    pub fn new(
        draws: &'a PosteriorDrawSet,
        formula: &'a ModelFormula,
        scaling: &'a ScalingParams,
        training_max: f64,
        settings: PredictionSettings,
    ) -> Self {
        Self {
            draws,
            formula,
            scaling,
            training_max,
            settings,
        }
    }

    /// Predicts survival for one profile at `horizons` using RNG stream `seed`.
    ///
    /// Draw `j` uses posterior draw `j mod n_draws`, so more predictive draws
    /// than posterior draws cycle through the posterior.
    pub fn predict(
        &self,
        profile: &CustomerProfile,
        horizons: &[f64],
        seed: u64,
    ) -> Result<SurvivalCurve, AnalysisError> {
        if self.settings.draws == 0 {
            return Err(ConfigError::Invalid("prediction needs at least one draw".into()).into());
        }
        let scaled = self.scaling.apply(&profile.covariates, 0)?;
        let x = self.formula.encode(&scaled, 0)?;
        if x.len() + 2 != self.draws.parameter_names().len() {
            return Err(ConfigError::Invalid(format!(
                "profile encodes {} coefficients but the draw set has {}",
                x.len(),
                self.draws.parameter_names().len().saturating_sub(2)
            ))
            .into());
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let n_posterior = self.draws.n_draws();
        let mut times = Vec::with_capacity(self.settings.draws);
        let mut params = Vec::with_capacity(self.settings.draws);
        for j in 0..self.settings.draws {
            let (intercept, beta, shape) = self.draws.draw(j % n_posterior);
            let scale = (intercept + x.dot(&beta)).exp();
            times.push(sample_time(&mut rng, scale, shape).unwrap_or(f64::INFINITY));
            params.push((scale, shape));
        }

        let points = horizons
            .iter()
            .map(|&h| {
                let analytic = sorted(
                    &params
                        .iter()
                        .map(|&(scale, shape)| survival_probability(h, scale, shape))
                        .collect::<Vec<_>>(),
                );
                let probability = times.iter().filter(|&&t| t > h).count() as f64 / times.len() as f64;
                SurvivalPoint {
                    horizon: h,
                    probability,
                    lower: quantile_sorted(&analytic, 0.025).min(probability),
                    upper: quantile_sorted(&analytic, 0.975).max(probability),
                    beyond_training: h > self.training_max,
                }
            })
            .collect();

        let times = sorted(&times);
        let median_time = quantile_sorted(&times, 0.5);
        let extrapolated = median_time > self.settings.extrapolation_factor * self.training_max;
        let mut warnings = Vec::new();
        if extrapolated {
            warnings.push(
                PipelineWarning::Extrapolation {
                    profile: profile.name.clone(),
                    median_time,
                    training_max: self.training_max,
                }
                .raise(),
            );
        }

        Ok(SurvivalCurve {
            profile: profile.name.clone(),
            points,
            median_time,
            q25_time: quantile_sorted(&times, 0.25),
            q75_time: quantile_sorted(&times, 0.75),
            extrapolated,
            warnings,
        })
    }

    /// Predicts every profile; profile `i` uses RNG stream `seed + i`.
    pub fn predict_all(
        &self,
        profiles: &[CustomerProfile],
        horizons: &[f64],
        seed: u64,
    ) -> Result<Vec<SurvivalCurve>, AnalysisError> {
        let curves = profiles
            .iter()
            .enumerate()
            .map(|(i, p)| self.predict(p, horizons, seed.wrapping_add(i as u64)))
            .collect::<Result<Vec<_>, _>>()?;
        info!("predicted survival for {} profiles", curves.len());
        Ok(curves)
    }
}
