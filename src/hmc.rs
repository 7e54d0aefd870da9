//! Hamiltonian Monte Carlo for the right-censored Weibull posterior.
//!
//! Each chain runs independently with its own seeded RNG:
//!
//! - Warmup adapts the step size by dual averaging and a diagonal inverse
//!   metric from windowed posterior variances.
//! - Transitions integrate a jittered trajectory length with the leapfrog
//!   scheme and accept with the Metropolis correction.
//! - Transitions whose energy error exceeds [`DIVERGENCE_THRESHOLD`] count as
//!   divergent and are rejected.
//!
//! Chains run on a rayon pool bounded by `SamplingParams::parallelism`.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::draws::{PosteriorDrawSet, INTERCEPT, SHAPE};
use crate::error::FitFailureError;
use crate::likelihood::WeibullPosterior;
use crate::math::RunningMoments;
use crate::sampler::{FitRequest, PosteriorSampler, SamplingParams};

/// Energy error above which a transition is flagged divergent.
pub const DIVERGENCE_THRESHOLD: f64 = 1000.0;
const MAX_INIT_ATTEMPTS: usize = 100;

/// Default sampler shipped with the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmcSampler;

impl PosteriorSampler for HmcSampler {
    fn sample(&self, request: &FitRequest<'_>) -> Result<PosteriorDrawSet, FitFailureError> {
        let params = request.params;
        params.validate()?;
        if request.design.n_obs() == 0 {
            return Err(FitFailureError::InvalidRequest("design has no observations".into()));
        }

        let posterior = WeibullPosterior::new(request.design, request.priors);
        let started = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.parallelism.max(1))
            .build()
            .map_err(|e| FitFailureError::InvalidRequest(format!("could not start sampler threads: {e}")))?;

        info!(
            "sampling {} chains ({} warmup, {} draws each) with priors '{}'",
            params.chains,
            params.warmup,
            params.draws_per_chain(),
            request.priors.name
        );

        let results: Vec<Result<ChainDraws, ChainError>> = pool.install(|| {
            (0..params.chains)
                .into_par_iter()
                .map(|chain| run_chain(&posterior, params, chain, started))
                .collect()
        });

        let mut failed_init = Vec::new();
        let mut chains = Vec::with_capacity(params.chains);
        let mut divergences = Vec::with_capacity(params.chains);
        for (chain, result) in results.into_iter().enumerate() {
            match result {
                Ok(draws) => {
                    chains.push(draws.draws);
                    divergences.push(draws.divergences);
                }
                Err(ChainError::Initialization) => failed_init.push(chain),
                Err(ChainError::Timeout(budget)) => return Err(FitFailureError::Timeout { budget }),
            }
        }
        if !failed_init.is_empty() {
            return Err(FitFailureError::ChainInitialization {
                chains: failed_init,
                attempts: MAX_INIT_ATTEMPTS,
            });
        }

        let kept = params.draws_per_chain() as f64;
        let fractions: Vec<f64> = divergences.iter().map(|&d| d as f64 / kept).collect();
        let bad: Vec<usize> = fractions
            .iter()
            .enumerate()
            .filter(|(_, f)| **f > params.max_divergence_fraction)
            .map(|(c, _)| c)
            .collect();
        if !bad.is_empty() {
            let worst = fractions.iter().cloned().fold(0.0, f64::max);
            return Err(FitFailureError::Divergence {
                chains: bad,
                worst_fraction: worst,
                tolerance: params.max_divergence_fraction,
            });
        }
        let total_divergent: usize = divergences.iter().sum();
        if total_divergent > 0 {
            warn!("{total_divergent} divergent transitions after warmup (within tolerance)");
        }

        let mut names = Vec::with_capacity(posterior.dim());
        names.push(INTERCEPT.to_string());
        names.extend(request.design.coefficient_names.iter().cloned());
        names.push(SHAPE.to_string());

        info!("sampling finished in {:.1?}", started.elapsed());
        Ok(PosteriorDrawSet::new(names, chains)?.with_divergences(divergences))
    }
}

enum ChainError {
    Initialization,
    Timeout(Duration),
}

struct ChainDraws {
    draws: Array2<f64>,
    divergences: usize,
}

/// Stan-style dual averaging of the log step size.
struct DualAveraging {
    mu: f64,
    target: f64,
    h_bar: f64,
    log_eps_bar: f64,
    counter: f64,
}

impl DualAveraging {
    const GAMMA: f64 = 0.05;
    const T0: f64 = 10.0;
    const KAPPA: f64 = 0.75;

    fn new(step_size: f64, target: f64) -> Self {
        Self {
            mu: (10.0 * step_size).ln(),
            target,
            h_bar: 0.0,
            log_eps_bar: 0.0,
            counter: 0.0,
        }
    }

    /// Feeds one acceptance statistic and returns the next step size.
    fn update(&mut self, accept_prob: f64) -> f64 {
        self.counter += 1.0;
        let m = self.counter;
        let eta = 1.0 / (m + Self::T0);
        self.h_bar = (1.0 - eta) * self.h_bar + eta * (self.target - accept_prob);
        let log_eps = self.mu - m.sqrt() / Self::GAMMA * self.h_bar;
        let weight = m.powf(-Self::KAPPA);
        self.log_eps_bar = weight * log_eps + (1.0 - weight) * self.log_eps_bar;
        log_eps.exp()
    }

    fn final_step_size(&self) -> f64 {
        self.log_eps_bar.exp()
    }
}

/// State of a single Markov chain.
struct ChainState<'a> {
    posterior: &'a WeibullPosterior<'a>,
    rng: StdRng,
    position: Array1<f64>,
    log_density: f64,
    grad: Array1<f64>,
    step_size: f64,
    inv_metric: Array1<f64>,
    max_steps: usize,
}

struct Transition {
    accept_prob: f64,
    divergent: bool,
}

impl<'a> ChainState<'a> {
    /// Draws an initial point with finite log density and gradient.
    fn initialize(
        posterior: &'a WeibullPosterior<'a>,
        mut rng: StdRng,
        max_steps: usize,
    ) -> Option<Self> {
        let dim = posterior.dim();
        let design = posterior.design();
        let log_mean_time = (design.time.sum() / design.n_obs() as f64).ln();
        for _ in 0..MAX_INIT_ATTEMPTS {
            let mut position = Array1::<f64>::zeros(dim);
            position[0] = log_mean_time + rng.gen_range(-1.0..1.0);
            for j in 1..dim {
                position[j] = rng.gen_range(-0.5..0.5);
            }
            let (lp, grad) = posterior.log_density_and_grad(position.view());
            if lp.is_finite() && grad.iter().all(|g| g.is_finite()) {
                return Some(Self {
                    posterior,
                    rng,
                    position,
                    log_density: lp,
                    grad,
                    step_size: 1.0,
                    inv_metric: Array1::ones(dim),
                    max_steps,
                });
            }
        }
        None
    }

    fn sample_momentum(&mut self) -> Array1<f64> {
        let rng = &mut self.rng;
        self.inv_metric
            .mapv(|m| rng.sample::<f64, _>(StandardNormal) / m.sqrt())
    }

    fn kinetic(&self, momentum: &Array1<f64>) -> f64 {
        0.5 * momentum
            .iter()
            .zip(self.inv_metric.iter())
            .map(|(p, m)| p * p * m)
            .sum::<f64>()
    }

    /// Runs `n_steps` leapfrog steps from the current point.
    fn leapfrog(
        &self,
        momentum: &mut Array1<f64>,
        step_size: f64,
        n_steps: usize,
    ) -> (Array1<f64>, f64, Array1<f64>) {
        let mut q = self.position.clone();
        let mut grad = self.grad.clone();
        let mut lp = self.log_density;
        for _ in 0..n_steps {
            momentum.scaled_add(0.5 * step_size, &grad);
            q.zip_mut_with(&(&self.inv_metric * &*momentum), |qi, v| *qi += step_size * v);
            let (new_lp, new_grad) = self.posterior.log_density_and_grad(q.view());
            lp = new_lp;
            grad = new_grad;
            if !lp.is_finite() {
                break;
            }
            momentum.scaled_add(0.5 * step_size, &grad);
        }
        (q, lp, grad)
    }

    /// Heuristic initial step size: double or halve until a single leapfrog
    /// step crosses an acceptance probability of one half.
    fn find_reasonable_step_size(&mut self) {
        let mut step = 1.0;
        let accept = |state: &mut Self, step: f64| {
            let mut momentum = state.sample_momentum();
            let h0 = state.kinetic(&momentum) - state.log_density;
            let (_, lp, _) = state.leapfrog(&mut momentum, step, 1);
            let h1 = state.kinetic(&momentum) - lp;
            let a = (h0 - h1).exp();
            if a.is_finite() {
                a
            } else {
                0.0
            }
        };
        let mut a = accept(self, step);
        let direction = if a > 0.5 { 1.0 } else { -1.0 };
        for _ in 0..50 {
            if (direction > 0.0 && a <= 0.5) || (direction < 0.0 && a >= 0.5) {
                break;
            }
            step *= 2f64.powf(direction);
            a = accept(self, step);
        }
        self.step_size = step;
    }

    /// One HMC transition.
    fn step(&mut self) -> Transition {
        // Jitter the integration time so trajectories do not resonate.
        let trajectory = self.rng.gen_range(0.8..2.0);
        let n_steps = ((trajectory / self.step_size).round() as usize).clamp(1, self.max_steps);

        let mut momentum = self.sample_momentum();
        let h0 = self.kinetic(&momentum) - self.log_density;
        let (q, lp, grad) = self.leapfrog(&mut momentum, self.step_size, n_steps);
        let h1 = self.kinetic(&momentum) - lp;
        let energy_error = h1 - h0;

        if !energy_error.is_finite() || energy_error > DIVERGENCE_THRESHOLD {
            return Transition {
                accept_prob: 0.0,
                divergent: true,
            };
        }

        let accept_prob = (-energy_error).exp().min(1.0);
        if self.rng.gen::<f64>() < accept_prob {
            self.position = q;
            self.log_density = lp;
            self.grad = grad;
        }
        Transition {
            accept_prob,
            divergent: false,
        }
    }

    /// Position mapped back to `[intercept, beta..., shape]`.
    fn constrained(&self) -> Array1<f64> {
        let mut out = self.position.clone();
        let last = out.len() - 1;
        out[last] = out[last].exp();
        out
    }
}

/// Warmup iterations at which the inverse metric is re-estimated.
fn metric_windows(warmup: usize) -> (usize, usize, usize) {
    let start = (warmup as f64 * 0.15) as usize;
    let end = (warmup as f64 * 0.85) as usize;
    let mid = start + (end - start) / 2;
    (start, mid, end)
}

fn run_chain(
    posterior: &WeibullPosterior<'_>,
    params: &SamplingParams,
    chain: usize,
    started: Instant,
) -> Result<ChainDraws, ChainError> {
    let rng = StdRng::seed_from_u64(params.seed.wrapping_add(chain as u64));
    let mut state =
        ChainState::initialize(posterior, rng, params.max_leapfrog_steps).ok_or(ChainError::Initialization)?;
    state.find_reasonable_step_size();

    let dim = posterior.dim();
    let mut adapter = DualAveraging::new(state.step_size, params.target_accept);
    let mut moments = RunningMoments::new(dim);
    let (window_start, window_mid, window_end) = metric_windows(params.warmup);
    let budget = params.time_budget();
    let n_keep = params.draws_per_chain();
    let mut draws = Array2::<f64>::zeros((n_keep, dim));
    let mut divergences = 0;

    for iter in 0..params.iterations {
        if let Some(budget) = budget {
            if started.elapsed() > budget {
                return Err(ChainError::Timeout(budget));
            }
        }

        let transition = state.step();

        if iter < params.warmup {
            state.step_size = adapter.update(transition.accept_prob);
            if iter >= window_start && iter < window_end {
                moments.update(&state.position);
            }
            if (iter + 1 == window_mid || iter + 1 == window_end) && moments.count() > 10 {
                // Regularize towards unit scale like Stan's windowed adaptation.
                let n = moments.count() as f64;
                state.inv_metric = moments
                    .variance()
                    .mapv(|v| (n / (n + 5.0)) * v + 1e-3 * (5.0 / (n + 5.0)));
                moments.reset();
                state.find_reasonable_step_size();
                adapter = DualAveraging::new(state.step_size, params.target_accept);
            }
            if iter + 1 == params.warmup {
                state.step_size = adapter.final_step_size();
                debug!("chain {chain}: adapted step size {:.4}", state.step_size);
            }
        } else {
            if transition.divergent {
                divergences += 1;
            }
            draws.row_mut(iter - params.warmup).assign(&state.constrained());
        }
    }

    Ok(ChainDraws { draws, divergences })
}
