//! Posterior-predictive checks.
//!
//! Replicate datasets are simulated from posterior draws (one draw per
//! replicate, one simulated time per observation) and compared with the
//! observed times at fixed horizons, by median and by a density histogram.
//! Discrepancies are reported with their magnitude and raised as calibration
//! warnings; they never fail the check.

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::draws::PosteriorDrawSet;
use crate::error::{AnalysisError, ConfigError};
use crate::formula::SurvivalDesign;
use crate::likelihood::sample_time;
use crate::math::{mean, quantile, quantile_sorted, sorted};
use crate::warnings::PipelineWarning;

/// Settings for [`PosteriorPredictiveChecker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpcSettings {
    /// Number of replicate datasets.
    pub replicates: usize,
    /// Horizons (months) at which survival fractions are compared.
    pub horizons: Vec<f64>,
    /// Absolute difference in survival fraction that raises a calibration warning.
    pub tolerance: f64,
    /// Bins of the density histogram.
    pub bins: usize,
}

impl Default for PpcSettings {
    fn default() -> Self {
        Self {
            replicates: 1000,
            horizons: vec![12.0, 24.0, 36.0, 48.0, 60.0],
            tolerance: 0.05,
            bins: 24,
        }
    }
}

/// Observed versus predicted survival at one horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonCheck {
    pub horizon: f64,
    /// Fraction of observed times greater than the horizon.
    pub observed: f64,
    /// Mean over replicates of the simulated fraction greater than the horizon.
    pub predicted: f64,
    /// `predicted - observed`.
    pub difference: f64,
}

/// Observed and replicate-averaged densities on shared bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityComparison {
    /// Bin edges, `bins + 1` values from zero to the largest observed time.
    pub edges: Vec<f64>,
    pub observed: Vec<f64>,
    pub simulated: Vec<f64>,
    /// Mean fraction of simulated times beyond the last edge.
    pub simulated_beyond_range: f64,
}

/// Result of a posterior-predictive check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveCheck {
    pub replicates: usize,
    pub horizons: Vec<HorizonCheck>,
    pub observed_median: f64,
    /// Median over replicates of the replicate median time.
    pub simulated_median: f64,
    /// 2.5 and 97.5 percentiles of the replicate medians.
    pub simulated_median_interval: (f64, f64),
    pub density: DensityComparison,
    pub warnings: Vec<PipelineWarning>,
}

struct Replicate {
    survival: Vec<f64>,
    median: f64,
    histogram: Vec<f64>,
    beyond: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PosteriorPredictiveChecker {
    pub settings: PpcSettings,
}

impl PosteriorPredictiveChecker {
    pub fn new(settings: PpcSettings) -> Self {
        Self { settings }
    }

    /// Simulates replicates of `design` under `draws`.
    ///
    /// Replicate `r` uses the RNG stream `seed + r` and posterior draw
    /// `r * n_draws / replicates`, so results are reproducible and do not
    /// depend on the number of worker threads.
    pub fn check(
        &self,
        design: &SurvivalDesign,
        draws: &PosteriorDrawSet,
        seed: u64,
    ) -> Result<PredictiveCheck, AnalysisError> {
        let settings = &self.settings;
        if settings.replicates == 0 || settings.bins == 0 {
            return Err(ConfigError::Invalid("predictive check needs at least one replicate and one bin".into()).into());
        }
        let n = design.n_obs();
        if n == 0 {
            return Err(ConfigError::Invalid("predictive check needs observations".into()).into());
        }

        let observed_times = design.time.to_vec();
        let max_time = observed_times.iter().cloned().fold(0.0, f64::max);
        let width = max_time / settings.bins as f64;
        let edges: Vec<f64> = (0..=settings.bins).map(|b| b as f64 * width).collect();
        let (observed_hist, _) = histogram(&observed_times, width, settings.bins);

        let total_draws = draws.n_draws();
        let replicates: Vec<Replicate> = (0..settings.replicates)
            .into_par_iter()
            .map(|r| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(r as u64));
                let (intercept, beta, shape) = draws.draw(r * total_draws / settings.replicates);
                let log_scale = design.x.dot(&beta) + intercept;
                let times: Vec<f64> = log_scale
                    .iter()
                    .map(|ls| sample_time(&mut rng, ls.exp(), shape).unwrap_or(f64::INFINITY))
                    .collect();
                let survival = settings
                    .horizons
                    .iter()
                    .map(|&h| fraction_above(&times, h))
                    .collect();
                let (histogram, beyond) = histogram(&times, width, settings.bins);
                Replicate {
                    survival,
                    median: quantile(&times, 0.5),
                    histogram,
                    beyond,
                }
            })
            .collect();

        let count = replicates.len() as f64;
        let horizons: Vec<HorizonCheck> = settings
            .horizons
            .iter()
            .enumerate()
            .map(|(k, &h)| {
                let observed = fraction_above(&observed_times, h);
                let predicted = replicates.iter().map(|r| r.survival[k]).sum::<f64>() / count;
                HorizonCheck {
                    horizon: h,
                    observed,
                    predicted,
                    difference: predicted - observed,
                }
            })
            .collect();

        let simulated: Vec<f64> = (0..settings.bins)
            .map(|b| replicates.iter().map(|r| r.histogram[b]).sum::<f64>() / count)
            .collect();
        let simulated_beyond_range = mean(&replicates.iter().map(|r| r.beyond).collect::<Vec<_>>());

        let medians = sorted(&replicates.iter().map(|r| r.median).collect::<Vec<_>>());
        let observed_median = quantile(&observed_times, 0.5);
        let simulated_median = quantile_sorted(&medians, 0.5);

        let warnings: Vec<PipelineWarning> = horizons
            .iter()
            .filter(|c| c.difference.abs() > settings.tolerance)
            .map(|c| {
                PipelineWarning::Calibration {
                    horizon: c.horizon,
                    observed: c.observed,
                    predicted: c.predicted,
                    tolerance: settings.tolerance,
                }
                .raise()
            })
            .collect();

        info!(
            "posterior predictive check: {} replicates, observed median {observed_median:.1}, simulated median {simulated_median:.1}",
            settings.replicates
        );

        Ok(PredictiveCheck {
            replicates: settings.replicates,
            horizons,
            observed_median,
            simulated_median,
            simulated_median_interval: (quantile_sorted(&medians, 0.025), quantile_sorted(&medians, 0.975)),
            density: DensityComparison {
                edges,
                observed: observed_hist,
                simulated,
                simulated_beyond_range,
            },
            warnings,
        })
    }
}

fn fraction_above(times: &[f64], horizon: f64) -> f64 {
    times.iter().filter(|&&t| t > horizon).count() as f64 / times.len() as f64
}

/// Density histogram on `[0, bins * width]` plus the fraction of values past
/// the last edge.
fn histogram(values: &[f64], width: f64, bins: usize) -> (Vec<f64>, f64) {
    let mut counts = vec![0.0; bins];
    let mut beyond = 0.0;
    for &v in values {
        let b = (v / width).floor();
        if b < bins as f64 {
            counts[b.max(0.0) as usize] += 1.0;
        } else if v <= width * bins as f64 {
            counts[bins - 1] += 1.0;
        } else {
            beyond += 1.0;
        }
    }
    let n = values.len() as f64;
    let density = counts.into_iter().map(|c| c / (n * width)).collect();
    (density, beyond / n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_integrates_to_in_range_mass() {
        let values = [0.5, 1.5, 2.5, 3.5, 10.0];
        let (density, beyond) = histogram(&values, 1.0, 4);
        let mass: f64 = density.iter().sum::<f64>() * 1.0;
        assert!((mass + beyond - 1.0).abs() < 1e-12);
        assert!((beyond - 0.2).abs() < 1e-12);
    }

    #[test]
    fn right_edge_lands_in_last_bin() {
        let (density, beyond) = histogram(&[4.0], 1.0, 4);
        assert_eq!(beyond, 0.0);
        assert_eq!(density[3], 1.0);
    }
}
