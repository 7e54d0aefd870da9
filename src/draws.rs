//! Posterior draw sets with retained chain identity.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, FitFailureError};

/// Name of the intercept parameter.
pub const INTERCEPT: &str = "Intercept";
/// Name of the Weibull shape parameter.
pub const SHAPE: &str = "shape";

/// Posterior draws, one `(draws, parameters)` block per chain.
///
/// Column order is `[Intercept, coefficients..., shape]`. Every chain has the
/// same number of draws and the same parameter names. A draw set is never
/// mutated once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorDrawSet {
    parameter_names: Vec<String>,
    chains: Vec<Array2<f64>>,
    /// Divergent transitions observed per chain after warmup.
    #[serde(default)]
    pub divergences: Vec<usize>,
}

impl PosteriorDrawSet {
    /// Builds a draw set, checking that every chain has matching shape.
    pub fn new(parameter_names: Vec<String>, chains: Vec<Array2<f64>>) -> Result<Self, FitFailureError> {
        let first = chains
            .first()
            .ok_or_else(|| FitFailureError::InvalidRequest("draw set has no chains".to_string()))?;
        let (n_draws, n_params) = first.dim();
        if n_params != parameter_names.len() {
            return Err(FitFailureError::InvalidRequest(format!(
                "{} parameter names for {} columns",
                parameter_names.len(),
                n_params
            )));
        }
        if n_draws == 0 {
            return Err(FitFailureError::InvalidRequest("chains hold no draws".to_string()));
        }
        if let Some(bad) = chains.iter().position(|c| c.dim() != (n_draws, n_params)) {
            return Err(FitFailureError::InvalidRequest(format!(
                "chain {bad} has shape {:?}, expected {:?}",
                chains[bad].dim(),
                (n_draws, n_params)
            )));
        }
        let divergences = vec![0; chains.len()];
        Ok(Self {
            parameter_names,
            chains,
            divergences,
        })
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    pub fn draws_per_chain(&self) -> usize {
        self.chains[0].nrows()
    }

    pub fn n_draws(&self) -> usize {
        self.n_chains() * self.draws_per_chain()
    }

    pub fn chains(&self) -> &[Array2<f64>] {
        &self.chains
    }

    /// Names of the regression coefficients (everything but intercept and shape).
    pub fn coefficient_names(&self) -> Vec<String> {
        self.parameter_names
            .iter()
            .filter(|n| n.as_str() != INTERCEPT && n.as_str() != SHAPE)
            .cloned()
            .collect()
    }

    pub fn index_of(&self, name: &str) -> Result<usize, AnalysisError> {
        self.parameter_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| AnalysisError::UnknownParameter(name.to_string()))
    }

    /// Draws of one parameter for each chain, chain identity kept.
    pub fn chain_columns(&self, idx: usize) -> Vec<ArrayView1<f64>> {
        self.chains.iter().map(|c| c.column(idx)).collect()
    }

    /// Draws of one parameter pooled across chains.
    pub fn pooled_column(&self, idx: usize) -> Vec<f64> {
        self.chains
            .iter()
            .flat_map(|c| c.column(idx).to_vec())
            .collect()
    }

    /// All draws stacked chain after chain, shape `(n_draws, n_params)`.
    pub fn pooled(&self) -> Array2<f64> {
        let views: Vec<_> = self.chains.iter().map(|c| c.view()).collect();
        ndarray::concatenate(Axis(0), &views).unwrap_or_else(|_| Array2::zeros((0, self.parameter_names.len())))
    }

    /// Parameters of pooled draw `d` split into `(intercept, coefficients, shape)`.
    pub fn draw(&self, d: usize) -> (f64, Array1<f64>, f64) {
        let per_chain = self.draws_per_chain();
        let row = self.chains[d / per_chain].row(d % per_chain);
        let last = row.len() - 1;
        (
            row[0],
            row.slice(ndarray::s![1..last]).to_owned(),
            row[last],
        )
    }

    /// Attaches per-chain divergence counts reported by the sampler.
    pub fn with_divergences(mut self, divergences: Vec<usize>) -> Self {
        self.divergences = divergences;
        self
    }
}
