//! Bayesian optimization with a Gaussian-process surrogate.
//!
//! Maintains observed (allocation → performance) pairs, fits an RBF-kernel
//! GP posterior each iteration, proposes the next allocation by maximizing
//! an acquisition function over ~100 candidates (70% uniform feasible, 30%
//! perturbations of the current top-3), and evaluates it deterministically.
//!
//! Observed values are sign-adjusted (so cac minimization becomes
//! maximization) and standardized before fitting, which keeps the kernel
//! variance meaningful across goals with wildly different scales.

pub(crate) mod acquisition;
pub(crate) mod gp;

pub use acquisition::Acquisition;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{OptimizeError, Result};
use crate::optimizer::constraints::Constraints;
use crate::optimizer::objective::Objective;
use crate::optimizer::CancelToken;
use crate::types::{AlgorithmKind, AlgorithmResult, Allocation, Channel, PerChannel};

use gp::{GaussianProcess, RbfKernel};

const MAX_FEASIBLE_ATTEMPTS: usize = 100;
/// Fraction of candidates drawn uniformly at random (the rest perturb the
/// current top points).
const EXPLORE_FRACTION: f64 = 0.7;
const TOP_POINTS_FOR_PERTURBATION: usize = 3;

/// Confidence conversion constants: base trust plus bonuses for a
/// confident posterior and healthy acquisition values.
const BASE_CONFIDENCE: f64 = 0.6;
const VARIANCE_BONUS: f64 = 0.2;
const ACQUISITION_BONUS: f64 = 0.2;
const ACQUISITION_HEALTH_SCALE: f64 = 0.1;

/// Bayesian optimizer parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BayesianConfig {
    /// Surrogate-guided evaluations after initialization.
    pub iterations: usize,
    /// Random feasible points evaluated before the loop starts.
    pub init_points: usize,
    /// Candidate next-points scored per iteration.
    pub candidates: usize,
    /// Per-channel perturbation radius around top points.
    pub perturbation: f64,
    pub acquisition: Acquisition,
    /// UCB exploration weight.
    pub exploration: f64,
    pub kernel_variance: f64,
    pub length_scale: f64,
    pub noise: f64,
    /// EI/PI improvement margin (ξ).
    pub improvement_margin: f64,
}

impl Default for BayesianConfig {
    fn default() -> Self {
        Self {
            iterations: 50,
            init_points: 5,
            candidates: 100,
            perturbation: 0.05,
            acquisition: Acquisition::default(),
            exploration: 2.0,
            kernel_variance: 1.0,
            length_scale: 0.5,
            noise: 1e-6,
            improvement_margin: 0.01,
        }
    }
}

impl BayesianConfig {
    fn kernel(&self) -> RbfKernel {
        RbfKernel {
            variance: self.kernel_variance,
            length_scale: self.length_scale,
            noise: self.noise,
        }
    }
}

/// Best observation plus posterior diagnostics.
#[derive(Debug, Clone)]
pub(crate) struct BayesianOutput {
    pub allocation: Allocation,
    pub performance: f64,
    /// Posterior mean at the best point, mapped back to goal units.
    pub posterior_mean: f64,
    /// Posterior variance at the best point, in standardized units
    /// (comparable to the kernel variance).
    pub posterior_variance: f64,
    /// Best acquisition value per iteration.
    pub acquisition_trace: Vec<f64>,
    pub evaluations: usize,
}

/// Run the optimization loop. Checks `cancel` once per iteration so an
/// abandoned task stops burning CPU shortly after its deadline.
pub(crate) fn optimize<R: Rng>(
    objective: &Objective,
    constraints: &Constraints,
    config: &BayesianConfig,
    rng: &mut R,
    cancel: &CancelToken,
) -> Result<BayesianOutput> {
    let direction = objective.direction();
    let sign = direction.sign();
    let kernel = config.kernel();

    let mut xs: Vec<[f64; 4]> = Vec::new();
    let mut raw: Vec<f64> = Vec::new();
    for _ in 0..config.init_points.max(2) {
        let alloc = random_feasible(constraints, rng);
        xs.push(alloc.as_array());
        raw.push(objective.value(&alloc));
    }

    let mut trace: Vec<f64> = Vec::with_capacity(config.iterations);
    for iter in 0..config.iterations {
        if cancel.is_cancelled() {
            debug!(iter, "bayesian loop cancelled");
            break;
        }

        let (ys, _, _) = standardize(&raw, sign);
        let gp = GaussianProcess::fit(kernel, &xs, &ys);
        let best_std = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let top = top_indices(&ys, TOP_POINTS_FOR_PERTURBATION);

        let mut best_candidate: Option<(Allocation, f64)> = None;
        for _ in 0..config.candidates.max(1) {
            let candidate = if rng.gen::<f64>() < EXPLORE_FRACTION || top.is_empty() {
                random_feasible(constraints, rng)
            } else {
                let anchor = xs[top[rng.gen_range(0..top.len())]];
                perturb(&anchor, config.perturbation, constraints, rng)
            };
            let posterior = gp.predict(&candidate.as_array());
            let value = acquisition::score(
                config.acquisition,
                &posterior,
                best_std,
                config.exploration,
                config.improvement_margin,
            );
            let replace = match &best_candidate {
                None => true,
                Some((_, best_value)) => value > *best_value,
            };
            if replace {
                best_candidate = Some((candidate, value));
            }
        }

        // candidates ≥ 1, so this is always present.
        let Some((next, acq_value)) = best_candidate else {
            break;
        };
        trace.push(acq_value);
        xs.push(next.as_array());
        raw.push(objective.value(&next));
    }

    let mut best_idx = 0;
    for (i, &perf) in raw.iter().enumerate() {
        if direction.better(perf, raw[best_idx]) {
            best_idx = i;
        }
    }
    let best_perf = raw[best_idx];
    if !best_perf.is_finite() {
        return Err(OptimizeError::AlgorithmFailure {
            algorithm: AlgorithmKind::Bayesian,
            message: "non-finite best performance".to_string(),
        });
    }

    // Final posterior at the winner for diagnostics and confidence.
    let (ys, y_mean, y_std) = standardize(&raw, sign);
    let gp = GaussianProcess::fit(kernel, &xs, &ys);
    let posterior = gp.predict(&xs[best_idx]);

    Ok(BayesianOutput {
        allocation: Allocation::from_shares(PerChannel {
            google: xs[best_idx][0],
            meta: xs[best_idx][1],
            tiktok: xs[best_idx][2],
            linkedin: xs[best_idx][3],
        }),
        performance: best_perf,
        posterior_mean: sign * (posterior.mean * y_std + y_mean),
        posterior_variance: posterior.variance,
        acquisition_trace: trace,
        evaluations: raw.len(),
    })
}

/// Sign-adjust and standardize observed values so the surrogate always
/// maximizes a roughly unit-scale target.
fn standardize(raw: &[f64], sign: f64) -> (Vec<f64>, f64, f64) {
    let internal: Vec<f64> = raw.iter().map(|&v| sign * v).collect();
    let n = internal.len() as f64;
    let mean = internal.iter().sum::<f64>() / n;
    let var = internal.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let std = if var.sqrt() > 1e-12 { var.sqrt() } else { 1.0 };
    (internal.iter().map(|v| (v - mean) / std).collect(), mean, std)
}

fn top_indices(ys: &[f64], count: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..ys.len()).collect();
    idx.sort_by(|&a, &b| ys[b].partial_cmp(&ys[a]).unwrap_or(std::cmp::Ordering::Equal));
    idx.truncate(count);
    idx
}

/// Draw a random allocation satisfying the constraints.
///
/// With floors present, starts from the floors and distributes the
/// remaining mass randomly, retrying up to [`MAX_FEASIBLE_ATTEMPTS`] times
/// to also satisfy ceilings; otherwise draws random weights. Falls back to
/// the constraint-projected equal split.
fn random_feasible<R: Rng>(constraints: &Constraints, rng: &mut R) -> Allocation {
    let floors_total = constraints.min_total();
    if floors_total > 0.0 && floors_total <= 1.0 {
        for _ in 0..MAX_FEASIBLE_ATTEMPTS {
            let remaining = 1.0 - floors_total;
            let weights: PerChannel<f64> = PerChannel::from_fn(|_| rng.gen::<f64>());
            let total: f64 = Channel::ALL.iter().map(|&ch| weights.value(ch)).sum();
            let candidate = Allocation::from_shares(PerChannel::from_fn(|ch| {
                constraints.floor(ch) + remaining * weights.value(ch) / total
            }));
            if constraints.respects_default(&candidate) {
                return candidate;
            }
        }
    } else if floors_total == 0.0 {
        for _ in 0..MAX_FEASIBLE_ATTEMPTS {
            let candidate = Allocation::from_weights(PerChannel::from_fn(|_| rng.gen::<f64>()));
            if constraints.respects_default(&candidate) {
                return candidate;
            }
        }
    }
    constraints.project(&Allocation::equal_split())
}

/// Small random perturbation around an anchor, re-projected.
fn perturb<R: Rng>(
    anchor: &[f64; 4],
    radius: f64,
    constraints: &Constraints,
    rng: &mut R,
) -> Allocation {
    let shares = PerChannel {
        google: (anchor[0] + rng.gen_range(-radius..=radius)).max(0.0),
        meta: (anchor[1] + rng.gen_range(-radius..=radius)).max(0.0),
        tiktok: (anchor[2] + rng.gen_range(-radius..=radius)).max(0.0),
        linkedin: (anchor[3] + rng.gen_range(-radius..=radius)).max(0.0),
    };
    constraints.project(&Allocation::from_weights(shares))
}

/// Convert to an [`AlgorithmResult`]: base trust 0.6, plus up to 0.2 for a
/// low posterior variance relative to the kernel variance and up to 0.2 for
/// healthy average acquisition values, capped at 1.
pub(crate) fn to_algorithm_result(
    output: &BayesianOutput,
    config: &BayesianConfig,
) -> AlgorithmResult {
    let var_ratio = if config.kernel_variance > 0.0 {
        (output.posterior_variance / config.kernel_variance).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let acq_mean = if output.acquisition_trace.is_empty() {
        0.0
    } else {
        (output.acquisition_trace.iter().sum::<f64>() / output.acquisition_trace.len() as f64)
            .max(0.0)
    };
    let acq_health = acq_mean / (acq_mean + ACQUISITION_HEALTH_SCALE);
    let confidence = (BASE_CONFIDENCE
        + VARIANCE_BONUS * (1.0 - var_ratio)
        + ACQUISITION_BONUS * acq_health)
        .min(1.0);

    AlgorithmResult {
        algorithm: AlgorithmKind::Bayesian,
        allocation: output.allocation,
        confidence,
        performance: output.performance,
        detail: Some(serde_json::json!({
            "evaluations": output.evaluations,
            "posterior_mean": output.posterior_mean,
            "posterior_variance": output.posterior_variance,
            "acquisition_trace_len": output.acquisition_trace.len(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Assumptions, ChannelMetrics, ChannelPriors, Goal, Interval, PartialShares,
    };
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn priors() -> ChannelPriors {
        PerChannel::from_fn(|ch| {
            let cvr = match ch {
                Channel::Google => 0.30,
                Channel::Meta => 0.15,
                Channel::Tiktok => 0.10,
                Channel::Linkedin => 0.05,
            };
            ChannelMetrics {
                cpm: Interval::new(12.0, 18.0),
                ctr: Interval::new(0.02, 0.04),
                cvr: Interval::new(cvr, cvr),
            }
        })
    }

    fn objective(goal: Goal) -> Objective {
        Objective::new(10_000.0, priors(), &Assumptions::new(goal))
    }

    fn quick_config() -> BayesianConfig {
        BayesianConfig {
            iterations: 15,
            candidates: 40,
            ..BayesianConfig::default()
        }
    }

    #[test]
    fn finds_a_feasible_simplex_point() {
        let mut rng = SmallRng::seed_from_u64(21);
        let out = optimize(
            &objective(Goal::Demos),
            &Constraints::default(),
            &quick_config(),
            &mut rng,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(out.allocation.sums_to_one(), "sum {}", out.allocation.sum());
        assert!(out.performance > 0.0);
        assert_eq!(out.evaluations, 5 + 15);
    }

    #[test]
    fn beats_equal_split_on_an_easy_landscape() {
        let obj = objective(Goal::Demos);
        let mut rng = SmallRng::seed_from_u64(22);
        let out = optimize(
            &obj,
            &Constraints::default(),
            &quick_config(),
            &mut rng,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(
            out.performance >= obj.value(&Allocation::equal_split()),
            "bayesian {} vs equal split {}",
            out.performance,
            obj.value(&Allocation::equal_split())
        );
    }

    #[test]
    fn respects_constraints() {
        let mut min = PartialShares::default();
        min.set(Channel::Linkedin, 0.2);
        let mut max = PartialShares::default();
        max.set(Channel::Google, 0.3);
        let constraints = Constraints::new(min, max);
        let mut rng = SmallRng::seed_from_u64(23);
        let out = optimize(
            &objective(Goal::Demos),
            &constraints,
            &quick_config(),
            &mut rng,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(
            constraints.respects(&out.allocation, 1e-6),
            "violating allocation {:?}",
            out.allocation
        );
    }

    #[test]
    fn cancellation_stops_the_loop_early() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut rng = SmallRng::seed_from_u64(24);
        let out = optimize(
            &objective(Goal::Demos),
            &Constraints::default(),
            &quick_config(),
            &mut rng,
            &cancel,
        )
        .unwrap();
        // Only the init points were evaluated.
        assert_eq!(out.evaluations, 5);
        assert!(out.acquisition_trace.is_empty());
    }

    #[test]
    fn random_feasible_honors_floors_and_ceilings() {
        let mut min = PartialShares::default();
        min.set(Channel::Google, 0.3);
        let mut max = PartialShares::default();
        max.set(Channel::Meta, 0.2);
        let constraints = Constraints::new(min, max);
        let mut rng = SmallRng::seed_from_u64(25);
        for _ in 0..50 {
            let a = random_feasible(&constraints, &mut rng);
            assert!(constraints.respects_default(&a), "infeasible draw {:?}", a);
            assert!(a.sums_to_one(), "sum {}", a.sum());
        }
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        let mut rng = SmallRng::seed_from_u64(26);
        let cfg = quick_config();
        let out = optimize(
            &objective(Goal::Cac),
            &Constraints::default(),
            &cfg,
            &mut rng,
            &CancelToken::new(),
        )
        .unwrap();
        let result = to_algorithm_result(&out, &cfg);
        assert!(
            (0.0..=1.0).contains(&result.confidence),
            "confidence {}",
            result.confidence
        );
        assert!(result.confidence >= BASE_CONFIDENCE);
    }
}
