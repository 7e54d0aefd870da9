//! Predictive information criteria: WAIC and PSIS-LOO.
//!
//! Both are computed observation by observation. For each record the
//! log-likelihood under every posterior draw is evaluated, reduced to its
//! pointwise contributions and dropped, so the full draws-by-observations
//! matrix is never held in memory.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::draws::PosteriorDrawSet;
use crate::formula::SurvivalDesign;
use crate::likelihood::log_lik_point;
use crate::math::{log_sum_exp, mean, sample_variance};

/// Pareto k above which importance sampling is considered unreliable.
pub const PARETO_K_THRESHOLD: f64 = 0.7;

/// Widely applicable information criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waic {
    pub elpd: f64,
    pub p_waic: f64,
    /// `-2 * elpd`.
    pub waic: f64,
    /// Standard error of `elpd`.
    pub se: f64,
    pub pointwise: Vec<f64>,
}

/// Pareto-smoothed importance-sampling leave-one-out cross-validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loo {
    pub elpd: f64,
    pub p_loo: f64,
    /// `-2 * elpd`.
    pub looic: f64,
    /// Standard error of `elpd`.
    pub se: f64,
    pub pointwise: Vec<f64>,
    pub pareto_k: Vec<f64>,
    /// Observations with `k > 0.7`.
    pub bad_k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationCriteria {
    pub waic: Waic,
    pub loo: Loo,
}

struct Pointwise {
    lppd: f64,
    p_waic: f64,
    elpd_loo: f64,
    k: f64,
}

/// Computes WAIC and PSIS-LOO for the fitted model.
pub fn information_criteria(design: &SurvivalDesign, draws: &PosteriorDrawSet) -> InformationCriteria {
    let n_draws = draws.n_draws();
    let params: Vec<(f64, ndarray::Array1<f64>, f64)> = (0..n_draws).map(|d| draws.draw(d)).collect();

    let points: Vec<Pointwise> = (0..design.n_obs())
        .into_par_iter()
        .map(|i| {
            let x = design.x.row(i);
            let ll: Vec<f64> = params
                .iter()
                .map(|(intercept, beta, shape)| {
                    log_lik_point(design.time[i], design.event[i], intercept + x.dot(beta), *shape)
                })
                .collect();
            pointwise(&ll)
        })
        .collect();

    let waic_pointwise: Vec<f64> = points.iter().map(|p| p.lppd - p.p_waic).collect();
    let loo_pointwise: Vec<f64> = points.iter().map(|p| p.elpd_loo).collect();
    let lppd: f64 = points.iter().map(|p| p.lppd).sum();

    let elpd_waic: f64 = waic_pointwise.iter().sum();
    let elpd_loo: f64 = loo_pointwise.iter().sum();
    let pareto_k: Vec<f64> = points.iter().map(|p| p.k).collect();
    let bad_k = pareto_k.iter().filter(|&&k| !(k <= PARETO_K_THRESHOLD)).count();

    InformationCriteria {
        waic: Waic {
            elpd: elpd_waic,
            p_waic: points.iter().map(|p| p.p_waic).sum(),
            waic: -2.0 * elpd_waic,
            se: sum_se(&waic_pointwise),
            pointwise: waic_pointwise,
        },
        loo: Loo {
            elpd: elpd_loo,
            p_loo: lppd - elpd_loo,
            looic: -2.0 * elpd_loo,
            se: sum_se(&loo_pointwise),
            pointwise: loo_pointwise,
            pareto_k,
            bad_k,
        },
    }
}

/// Standard error of a sum of `n` pointwise terms: `sqrt(n * var)`.
pub fn sum_se(pointwise: &[f64]) -> f64 {
    (pointwise.len() as f64 * sample_variance(pointwise)).sqrt()
}

/// Difference of two models' pointwise elpd values with its standard error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElpdDifference {
    /// `sum(a - b)`.
    pub elpd_diff: f64,
    pub se: f64,
}

pub fn elpd_difference(a: &[f64], b: &[f64]) -> ElpdDifference {
    let diff: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - y).collect();
    ElpdDifference {
        elpd_diff: diff.iter().sum(),
        se: sum_se(&diff),
    }
}

fn pointwise(ll: &[f64]) -> Pointwise {
    let s = ll.len() as f64;
    let lppd = log_sum_exp(ll) - s.ln();
    let p_waic = sample_variance(ll);

    let log_ratios: Vec<f64> = ll.iter().map(|v| -v).collect();
    let (log_weights, k) = psis_smooth(&log_ratios);
    let weighted: Vec<f64> = log_weights.iter().zip(ll).map(|(w, l)| w + l).collect();
    Pointwise {
        lppd,
        p_waic,
        elpd_loo: log_sum_exp(&weighted),
        k,
    }
}

/// Pareto-smooths log importance ratios.
///
/// Returns normalized log weights and the estimated Pareto shape `k`. The
/// largest `M = ceil(min(0.2 S, 3 sqrt(S)))` ratios are replaced by expected
/// order statistics of a generalized Pareto fit, then truncated at the
/// largest raw ratio.
pub fn psis_smooth(log_ratios: &[f64]) -> (Vec<f64>, f64) {
    let s = log_ratios.len();
    let max = log_ratios.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut lw: Vec<f64> = log_ratios.iter().map(|r| r - max).collect();

    let tail_len = ((0.2 * s as f64).min(3.0 * (s as f64).sqrt())).ceil() as usize;
    let mut k = f64::INFINITY;
    if tail_len >= 5 && tail_len < s {
        let mut order: Vec<usize> = (0..s).collect();
        order.sort_by(|&a, &b| lw[a].total_cmp(&lw[b]));
        let tail_idx = &order[s - tail_len..];
        let cutoff = lw[order[s - tail_len - 1]].max(f64::MIN_POSITIVE.ln());
        let exp_cutoff = cutoff.exp();
        let tail: Vec<f64> = tail_idx.iter().map(|&i| lw[i].exp() - exp_cutoff).collect();

        if tail.iter().any(|&t| t > 0.0) && tail[0] < tail[tail_len - 1] {
            let (k_hat, sigma) = gpd_fit(&tail);
            k = k_hat;
            if k_hat.is_finite() && sigma.is_finite() {
                for (rank, &i) in tail_idx.iter().enumerate() {
                    let p = (rank as f64 + 0.5) / tail_len as f64;
                    let smoothed = (gpd_quantile(p, k_hat, sigma) + exp_cutoff).ln();
                    lw[i] = smoothed.min(0.0);
                }
            }
        }
    }

    let norm = log_sum_exp(&lw);
    for w in &mut lw {
        *w -= norm;
    }
    (lw, k)
}

/// Quantile of the generalized Pareto distribution with location zero.
fn gpd_quantile(p: f64, k: f64, sigma: f64) -> f64 {
    if k.abs() < 1e-12 {
        -sigma * (-p).ln_1p()
    } else {
        sigma * (-k * (-p).ln_1p()).exp_m1() / k
    }
}

/// Zhang & Stephens (2009) empirical-Bayes fit of a generalized Pareto to
/// ascending exceedances `x`, with the weakly informative shape prior of
/// Vehtari et al. Returns `(k, sigma)`.
fn gpd_fit(x: &[f64]) -> (f64, f64) {
    const PRIOR_BS: f64 = 3.0;
    const PRIOR_K: f64 = 10.0;
    let n = x.len();
    let nf = n as f64;
    let m = 30 + (nf.sqrt() as usize);

    let quartile = x[((nf / 4.0 + 0.5) as usize).saturating_sub(1)];
    let x_max = x[n - 1];
    if !(quartile > 0.0) {
        return (f64::INFINITY, f64::NAN);
    }
    let b: Vec<f64> = (1..=m)
        .map(|j| {
            let base = 1.0 - (m as f64 / (j as f64 - 0.5)).sqrt();
            base / (PRIOR_BS * quartile) + 1.0 / x_max
        })
        .collect();
    let k_ary: Vec<f64> = b
        .iter()
        .map(|&bj| mean(&x.iter().map(|&xi| (-bj * xi).ln_1p()).collect::<Vec<_>>()))
        .collect();
    let len_scale: Vec<f64> = b
        .iter()
        .zip(&k_ary)
        .map(|(&bj, &kj)| nf * ((-bj / kj).ln() - kj - 1.0))
        .collect();

    let mut weights: Vec<f64> = len_scale
        .iter()
        .map(|&li| 1.0 / len_scale.iter().map(|&lj| (lj - li).exp()).sum::<f64>())
        .collect();
    for w in &mut weights {
        if !(*w >= 10.0 * f64::EPSILON) {
            *w = 0.0;
        }
    }
    let total: f64 = weights.iter().sum();
    if !(total > 0.0) {
        return (f64::INFINITY, f64::NAN);
    }
    let b_post: f64 = b.iter().zip(&weights).map(|(bj, w)| bj * w / total).sum();
    let k_post = mean(&x.iter().map(|&xi| (-b_post * xi).ln_1p()).collect::<Vec<_>>());
    let sigma = -k_post / b_post;
    let k_post = (nf * k_post + PRIOR_K * 0.5) / (nf + PRIOR_K);
    (k_post, sigma)
}
