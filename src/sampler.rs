//! Contract between the fit orchestrator and a posterior-sampling service.
//!
//! Any sampler that can draw from the right-censored Weibull posterior
//! implements [`PosteriorSampler`]. The crate ships [`crate::hmc::HmcSampler`]
//! as the default implementation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::draws::PosteriorDrawSet;
use crate::error::FitFailureError;
use crate::formula::{ModelFormula, SurvivalDesign};
use crate::priors::PriorConfiguration;

/// SamplingParams are the run settings handed to a sampler.
///
/// `iterations` counts warmup, so each chain keeps `iterations - warmup`
/// draws. The seed is explicit; chain `c` derives its stream from `seed + c`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Number of independent Markov chains.
    pub chains: usize,
    /// Warmup (adaptation) iterations per chain, discarded.
    pub warmup: usize,
    /// Total iterations per chain, warmup included.
    pub iterations: usize,
    /// Maximum number of chains run concurrently.
    pub parallelism: usize,
    /// Base random seed.
    pub seed: u64,
    /// Wall-clock budget for the whole fit, in seconds.
    pub time_budget_secs: Option<u64>,
    /// Largest tolerated fraction of divergent post-warmup transitions per chain.
    pub max_divergence_fraction: f64,
    /// Target acceptance rate for step-size adaptation.
    pub target_accept: f64,
    /// Upper bound on leapfrog steps per transition.
    pub max_leapfrog_steps: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            chains: 4,
            warmup: 1000,
            iterations: 2000,
            parallelism: 4,
            seed: 1234,
            time_budget_secs: None,
            max_divergence_fraction: 0.05,
            target_accept: 0.8,
            max_leapfrog_steps: 64,
        }
    }
}

impl SamplingParams {
    /// Creates settings with the given chain layout and seed, other fields default.
    pub fn new(chains: usize, warmup: usize, iterations: usize, seed: u64) -> Self {
        Self {
            chains,
            warmup,
            iterations,
            parallelism: chains.max(1),
            seed,
            ..Self::default()
        }
    }

    /// Draws kept per chain.
    pub fn draws_per_chain(&self) -> usize {
        self.iterations.saturating_sub(self.warmup)
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs.map(Duration::from_secs)
    }

    /// Rejects settings no sampler can honour.
    pub fn validate(&self) -> Result<(), FitFailureError> {
        if self.chains == 0 {
            return Err(FitFailureError::InvalidRequest("at least one chain is required".into()));
        }
        if self.draws_per_chain() == 0 {
            return Err(FitFailureError::InvalidRequest(format!(
                "iterations ({}) must exceed warmup ({})",
                self.iterations, self.warmup
            )));
        }
        if !(0.0..1.0).contains(&self.target_accept) || self.target_accept == 0.0 {
            return Err(FitFailureError::InvalidRequest(format!(
                "target_accept must lie in (0, 1), found {}",
                self.target_accept
            )));
        }
        if self.max_leapfrog_steps == 0 {
            return Err(FitFailureError::InvalidRequest("max_leapfrog_steps must be positive".into()));
        }
        Ok(())
    }
}

/// Everything a sampler needs for one fit.
#[derive(Debug, Clone, Copy)]
pub struct FitRequest<'a> {
    pub design: &'a SurvivalDesign,
    pub formula: &'a ModelFormula,
    pub priors: &'a PriorConfiguration,
    pub params: &'a SamplingParams,
}

/// A posterior-sampling service.
///
/// Implementations return the merged draw set across all chains or a single
/// failure. They must never return a partial draw set, and the same request
/// with the same seed must reproduce the same draws.
pub trait PosteriorSampler: Send + Sync {
    fn sample(&self, request: &FitRequest<'_>) -> Result<PosteriorDrawSet, FitFailureError>;
}
