//! Convergence diagnostics: rank-normalized split R-hat and bulk effective
//! sample size.
//!
//! Each chain is split in half, draws are pooled and replaced by normal
//! scores of their ranks, and the usual between/within variance ratio is
//! computed on the result. R-hat is the larger of the value on the draws and
//! on the draws folded around their median. Bulk ESS uses Geyer's initial
//! monotone sequence on the same rank-normalized split chains.

use log::info;
use serde::{Deserialize, Serialize};

use crate::draws::PosteriorDrawSet;
use crate::math::{mean, quantile, standard_normal_quantile};
use crate::warnings::PipelineWarning;

/// Acceptance thresholds for convergence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticThresholds {
    /// Every R-hat must be strictly below this.
    pub max_rhat: f64,
    /// Every bulk ESS must be at least this.
    pub min_ess: f64,
}

impl Default for DiagnosticThresholds {
    fn default() -> Self {
        Self {
            max_rhat: 1.01,
            min_ess: 400.0,
        }
    }
}

/// Diagnostics for a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDiagnostics {
    pub name: String,
    pub rhat: f64,
    pub ess_bulk: f64,
}

/// Diagnostics for a whole draw set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub parameters: Vec<ParameterDiagnostics>,
    pub max_rhat: f64,
    pub min_ess: f64,
    pub converged: bool,
    /// Divergent post-warmup transitions summed over chains.
    pub divergences: usize,
    pub thresholds: DiagnosticThresholds,
}

impl ConvergenceReport {
    /// Parameters failing either threshold.
    pub fn failing(&self) -> Vec<String> {
        self.parameters
            .iter()
            .filter(|p| !passes(p, &self.thresholds))
            .map(|p| p.name.clone())
            .collect()
    }

    /// The convergence warning for this report, if any.
    pub fn warning(&self) -> Option<PipelineWarning> {
        if self.converged {
            return None;
        }
        Some(PipelineWarning::Convergence {
            max_rhat: self.max_rhat,
            min_ess: self.min_ess,
            max_rhat_allowed: self.thresholds.max_rhat,
            min_ess_required: self.thresholds.min_ess,
            parameters: self.failing(),
        })
    }
}

fn passes(p: &ParameterDiagnostics, thresholds: &DiagnosticThresholds) -> bool {
    p.rhat < thresholds.max_rhat && p.ess_bulk >= thresholds.min_ess
}

/// Computes R-hat and bulk ESS for every parameter of `draws`.
///
/// Non-finite diagnostics (constant draws, too few draws) count as failures.
pub fn diagnose(draws: &PosteriorDrawSet, thresholds: DiagnosticThresholds) -> ConvergenceReport {
    let parameters: Vec<ParameterDiagnostics> = draws
        .parameter_names()
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let chains: Vec<Vec<f64>> = draws.chain_columns(idx).iter().map(|c| c.to_vec()).collect();
            ParameterDiagnostics {
                name: name.clone(),
                rhat: rank_normalized_rhat(&chains),
                ess_bulk: bulk_ess(&chains),
            }
        })
        .collect();

    let max_rhat = parameters
        .iter()
        .map(|p| p.rhat)
        .fold(f64::NEG_INFINITY, |a, b| if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) });
    let min_ess = parameters
        .iter()
        .map(|p| p.ess_bulk)
        .fold(f64::INFINITY, |a, b| if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) });
    let converged = parameters.iter().all(|p| passes(p, &thresholds));

    info!("convergence: max R-hat {max_rhat:.4}, min bulk ESS {min_ess:.0}, converged {converged}");

    ConvergenceReport {
        parameters,
        max_rhat,
        min_ess,
        converged,
        divergences: draws.divergences.iter().sum(),
        thresholds,
    }
}

/// Rank-normalized split R-hat: the maximum of the bulk and folded values.
pub fn rank_normalized_rhat(chains: &[Vec<f64>]) -> f64 {
    let split = split_chains(chains);
    if split.is_empty() {
        return f64::NAN;
    }
    let bulk = rhat(&rank_normalize(&split));

    let pooled: Vec<f64> = split.iter().flatten().copied().collect();
    let median = quantile(&pooled, 0.5);
    let folded: Vec<Vec<f64>> = split
        .iter()
        .map(|c| c.iter().map(|v| (v - median).abs()).collect())
        .collect();
    let tail = rhat(&rank_normalize(&folded));

    if bulk.is_nan() || tail.is_nan() {
        f64::NAN
    } else {
        bulk.max(tail)
    }
}

/// Bulk effective sample size on rank-normalized split chains.
pub fn bulk_ess(chains: &[Vec<f64>]) -> f64 {
    let split = split_chains(chains);
    if split.is_empty() {
        return f64::NAN;
    }
    ess(&rank_normalize(&split))
}

/// Halves each chain, dropping the middle draw of odd-length chains.
fn split_chains(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = chains.iter().map(Vec::len).min().unwrap_or(0);
    if n < 4 {
        return Vec::new();
    }
    let half = n / 2;
    chains
        .iter()
        .flat_map(|c| [c[..half].to_vec(), c[n - half..n].to_vec()])
        .collect()
}

/// Replaces every draw by `Φ⁻¹((r - 3/8) / (S + 1/4))`, with `r` its
/// average rank among all `S` pooled draws.
fn rank_normalize(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let pooled: Vec<f64> = chains.iter().flatten().copied().collect();
    let s = pooled.len();
    let mut order: Vec<usize> = (0..s).collect();
    order.sort_by(|&a, &b| pooled[a].total_cmp(&pooled[b]));

    let mut ranks = vec![0.0; s];
    let mut start = 0;
    while start < s {
        let mut end = start + 1;
        while end < s && pooled[order[end]] == pooled[order[start]] {
            end += 1;
        }
        // Ranks are 1-based; ties share their average.
        let avg = (start + end + 1) as f64 / 2.0;
        for &i in &order[start..end] {
            ranks[i] = avg;
        }
        start = end;
    }

    let denom = s as f64 + 0.25;
    let mut out = Vec::with_capacity(chains.len());
    let mut offset = 0;
    for c in chains {
        out.push(
            (0..c.len())
                .map(|j| standard_normal_quantile((ranks[offset + j] - 0.375) / denom))
                .collect(),
        );
        offset += c.len();
    }
    out
}

fn rhat(chains: &[Vec<f64>]) -> f64 {
    let m = chains.len();
    let n = chains[0].len();
    if m < 2 || n < 2 {
        return f64::NAN;
    }
    let means: Vec<f64> = chains.iter().map(|c| mean(c)).collect();
    let vars: Vec<f64> = chains
        .iter()
        .zip(&means)
        .map(|(c, mu)| c.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / (n as f64 - 1.0))
        .collect();
    let grand = mean(&means);
    let between = n as f64 * means.iter().map(|mu| (mu - grand).powi(2)).sum::<f64>() / (m as f64 - 1.0);
    let within = mean(&vars);
    if within <= 0.0 || !within.is_finite() {
        return f64::NAN;
    }
    let var_plus = (n as f64 - 1.0) / n as f64 * within + between / n as f64;
    (var_plus / within).sqrt()
}

/// Biased autocovariance of `x` at `lag`.
fn autocovariance(x: &[f64], mu: f64, lag: usize) -> f64 {
    let n = x.len();
    if lag >= n {
        return 0.0;
    }
    x[..n - lag]
        .iter()
        .zip(&x[lag..])
        .map(|(a, b)| (a - mu) * (b - mu))
        .sum::<f64>()
        / n as f64
}

fn ess(chains: &[Vec<f64>]) -> f64 {
    let m = chains.len();
    let n = chains[0].len();
    if n < 4 {
        return f64::NAN;
    }
    let means: Vec<f64> = chains.iter().map(|c| mean(c)).collect();
    let mean_acov = |lag: usize| -> f64 {
        chains
            .iter()
            .zip(&means)
            .map(|(c, &mu)| autocovariance(c, mu, lag))
            .sum::<f64>()
            / m as f64
    };

    let nf = n as f64;
    let mean_var = mean_acov(0) * nf / (nf - 1.0);
    let mut var_plus = mean_var * (nf - 1.0) / nf;
    if m > 1 {
        let grand = mean(&means);
        var_plus += means.iter().map(|mu| (mu - grand).powi(2)).sum::<f64>() / (m as f64 - 1.0);
    }
    if var_plus <= 0.0 || !var_plus.is_finite() {
        return f64::NAN;
    }
    let rho = |lag: usize| 1.0 - (mean_var - mean_acov(lag)) / var_plus;

    // Geyer's initial positive sequence over pairs of lags.
    let mut rho_hat = vec![0.0; n + 1];
    rho_hat[0] = 1.0;
    let mut rho_even = 1.0;
    let mut rho_odd = rho(1);
    rho_hat[1] = rho_odd;
    let mut t = 1;
    while t + 5 < n && rho_even + rho_odd > 0.0 {
        rho_even = rho(t + 1);
        rho_odd = rho(t + 2);
        if rho_even + rho_odd >= 0.0 {
            rho_hat[t + 1] = rho_even;
            rho_hat[t + 2] = rho_odd;
        }
        t += 2;
    }
    let max_t = t;
    if rho_even > 0.0 {
        rho_hat[max_t + 1] = rho_even;
    }

    // Initial monotone sequence.
    let mut t = 1;
    while t + 4 <= max_t {
        let prev = rho_hat[t - 1] + rho_hat[t];
        if rho_hat[t + 1] + rho_hat[t + 2] > prev {
            rho_hat[t + 1] = prev / 2.0;
            rho_hat[t + 2] = prev / 2.0;
        }
        t += 2;
    }

    let total = (m * n) as f64;
    let tau = -1.0 + 2.0 * rho_hat[..max_t].iter().sum::<f64>() + rho_hat[max_t + 1];
    let tau = tau.max(1.0 / total.log10());
    total / tau
}
