//! Small numerical helpers shared across the pipeline: moments, empirical
//! quantiles, log-sum-exp, a symmetric positive-definite solver and running
//! (Welford) statistics used during sampler adaptation.

use ndarray::{Array1, Array2};
use statrs::function::erf::erf_inv;

/// Arithmetic mean. Returns `NaN` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance (denominator `n - 1`). Zero for fewer than two values.
pub fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mu = mean(values);
    values.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / (n - 1) as f64
}

/// Returns a sorted copy of `values` using a total order on floats.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Empirical quantile of already-sorted data using linear interpolation
/// between order statistics (Hyndman & Fan type 7).
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 {
        return sorted[0];
    }
    let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Empirical quantile of unsorted data.
pub fn quantile(values: &[f64], p: f64) -> f64 {
    quantile_sorted(&sorted(values), p)
}

/// Numerically stable `log(sum(exp(values)))`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Inverse CDF of the standard normal distribution.
pub fn standard_normal_quantile(p: f64) -> f64 {
    std::f64::consts::SQRT_2 * erf_inv(2.0 * p - 1.0)
}

/// Solves `A x = b` for symmetric positive-definite `A` by Cholesky
/// factorization.
///
/// If the factorization fails, a growing ridge is added to the diagonal
/// before giving up and returning `None`.
pub fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if a.ncols() != n || b.len() != n {
        return None;
    }
    let mut ridge = 0.0;
    for _ in 0..8 {
        if let Some(l) = cholesky(a, ridge) {
            // Forward substitution: L y = b
            let mut y = Array1::<f64>::zeros(n);
            for i in 0..n {
                let mut s = b[i];
                for k in 0..i {
                    s -= l[[i, k]] * y[k];
                }
                y[i] = s / l[[i, i]];
            }
            // Back substitution: L^T x = y
            let mut x = Array1::<f64>::zeros(n);
            for i in (0..n).rev() {
                let mut s = y[i];
                for k in (i + 1)..n {
                    s -= l[[k, i]] * x[k];
                }
                x[i] = s / l[[i, i]];
            }
            return Some(x);
        }
        ridge = if ridge == 0.0 { 1e-10 } else { ridge * 100.0 };
    }
    None
}

fn cholesky(a: &Array2<f64>, ridge: f64) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut d = a[[j, j]] + ridge;
        for k in 0..j {
            d -= l[[j, k]] * l[[j, k]];
        }
        if d <= 0.0 || !d.is_finite() {
            return None;
        }
        let d = d.sqrt();
        l[[j, j]] = d;
        for i in (j + 1)..n {
            let mut s = a[[i, j]];
            for k in 0..j {
                s -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = s / d;
        }
    }
    Some(l)
}

/// Running element-wise mean and variance of a stream of vectors.
#[derive(Debug, Clone)]
pub struct RunningMoments {
    count: usize,
    mean: Array1<f64>,
    m2: Array1<f64>,
}

impl RunningMoments {
    /// Creates an empty accumulator for vectors of length `dim`.
    pub fn new(dim: usize) -> Self {
        Self {
            count: 0,
            mean: Array1::zeros(dim),
            m2: Array1::zeros(dim),
        }
    }

    /// Adds one observation.
    pub fn update(&mut self, x: &Array1<f64>) {
        self.count += 1;
        let n = self.count as f64;
        for ((m, s), &v) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(x.iter()) {
            let delta = v - *m;
            *m += delta / n;
            *s += delta * (v - *m);
        }
    }

    /// Number of observations seen so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Sample variance per element. Zero before two observations.
    pub fn variance(&self) -> Array1<f64> {
        if self.count < 2 {
            return Array1::zeros(self.mean.len());
        }
        self.m2.mapv(|s| s / (self.count - 1) as f64)
    }

    /// Clears all accumulated observations.
    pub fn reset(&mut self) {
        self.count = 0;
        self.mean.fill(0.0);
        self.m2.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn quantile_interpolates_between_order_statistics() {
        let values = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(quantile(&values, 0.0), 1.0);
        assert_eq!(quantile(&values, 1.0), 4.0);
        assert!((quantile(&values, 0.5) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn log_sum_exp_matches_direct_sum() {
        let values = [0.1, -2.0, 1.5];
        let direct = values.iter().map(|v: &f64| v.exp()).sum::<f64>().ln();
        assert!((log_sum_exp(&values) - direct).abs() < 1e-12);
    }

    #[test]
    fn solve_spd_recovers_solution() {
        let a = array![[4.0, 1.0], [1.0, 3.0]];
        let b = array![1.0, 2.0];
        let x = solve_spd(&a, &b).unwrap();
        let r = a.dot(&x) - &b;
        assert!(r.iter().all(|v| v.abs() < 1e-10));
    }

    #[test]
    fn normal_quantile_is_symmetric() {
        assert!(standard_normal_quantile(0.5).abs() < 1e-12);
        assert!((standard_normal_quantile(0.975) - 1.959964).abs() < 1e-5);
        assert!((standard_normal_quantile(0.025) + standard_normal_quantile(0.975)).abs() < 1e-9);
    }

    #[test]
    fn running_moments_match_batch_variance() {
        let mut moments = RunningMoments::new(1);
        let values = [1.0, 2.0, 4.0, 7.0];
        for v in values {
            moments.update(&array![v]);
        }
        assert!((moments.variance()[0] - sample_variance(&values)).abs() < 1e-12);
    }
}
