//! Local gradient-based search over the constrained allocation simplex.
//!
//! Estimates the objective's gradient by central finite differences (bump
//! one channel, hold the others proportionally adjusted), steps in the
//! improving direction scaled by a learning rate, and projects back onto
//! the constraint set after every step. Runs from multiple seeds and keeps
//! the best endpoint.

use rand::Rng;
use tracing::debug;

use crate::optimizer::config::TuningConfig;
use crate::optimizer::constraints::Constraints;
use crate::optimizer::heuristic;
use crate::optimizer::objective::Objective;
use crate::types::{AlgorithmKind, AlgorithmResult, Allocation, Channel, Direction, PerChannel};

const GRADIENT_FLOOR: f64 = 1e-12;

/// Gradient search parameters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GradientConfig {
    pub learning_rate: f64,
    pub max_iterations: usize,
    /// Stop once the per-step objective improvement drops below this.
    pub tolerance: f64,
    /// Finite-difference perturbation size.
    pub fd_step: f64,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            max_iterations: 100,
            tolerance: 1e-6,
            fd_step: 0.01,
        }
    }
}

/// Endpoint of a gradient run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GradientOutput {
    pub allocation: Allocation,
    pub performance: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Run the search from the default seeds (constraint-projected equal split
/// and heuristic allocation) and keep the best endpoint.
pub(crate) fn optimize(
    objective: &Objective,
    constraints: &Constraints,
    config: &GradientConfig,
) -> GradientOutput {
    let seeds = [
        constraints.project(&Allocation::equal_split()),
        heuristic::optimize(&objective.priors, constraints),
    ];
    let direction = objective.direction();
    let mut best: Option<GradientOutput> = None;
    for seed in seeds {
        let run = climb(objective, constraints, config, seed);
        let replace = match &best {
            None => true,
            Some(b) => direction.better(run.performance, b.performance),
        };
        if replace {
            best = Some(run);
        }
    }
    // Two seeds always produce a run.
    best.unwrap_or_else(|| climb(objective, constraints, config, Allocation::equal_split()))
}

fn climb(
    objective: &Objective,
    constraints: &Constraints,
    config: &GradientConfig,
    seed: Allocation,
) -> GradientOutput {
    let direction = objective.direction();
    let mut current = seed;
    let mut value = objective.value(&current);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..config.max_iterations {
        iterations = iter + 1;
        let gradient = finite_difference_gradient(objective, &current, config.fd_step);
        let max_mag = Channel::ALL
            .iter()
            .map(|&ch| gradient.value(ch).abs())
            .fold(0.0f64, f64::max);
        if max_mag < GRADIENT_FLOOR {
            converged = true;
            break;
        }

        // Normalize by the largest component so the step size is bounded
        // by the learning rate regardless of objective scale.
        let mut stepped = current;
        for &ch in &Channel::ALL {
            let delta = direction.sign() * config.learning_rate * gradient.value(ch) / max_mag;
            stepped.set(ch, (current.get(ch) + delta).max(0.0));
        }
        let candidate = constraints.project(&stepped);
        let candidate_value = objective.value(&candidate);

        let improvement = direction.sign() * (candidate_value - value);
        if improvement <= 0.0 {
            converged = true;
            break;
        }
        current = candidate;
        value = candidate_value;
        if improvement < config.tolerance {
            converged = true;
            break;
        }
    }

    debug!(
        iterations,
        converged,
        performance = value,
        "gradient run finished"
    );
    GradientOutput {
        allocation: current,
        performance: value,
        iterations,
        converged,
    }
}

/// Central finite differences on the deterministic objective. Each bump
/// moves one channel by ±step and rescales the others so the perturbed
/// allocation stays on the simplex.
fn finite_difference_gradient(
    objective: &Objective,
    allocation: &Allocation,
    step: f64,
) -> PerChannel<f64> {
    PerChannel::from_fn(|ch| {
        let up = objective.value(&bump(allocation, ch, step));
        let down = objective.value(&bump(allocation, ch, -step));
        (up - down) / (2.0 * step)
    })
}

fn bump(allocation: &Allocation, channel: Channel, delta: f64) -> Allocation {
    let old = allocation.get(channel);
    let new = (old + delta).clamp(0.0, 1.0);
    let rest_old = 1.0 - old;
    let rest_new = 1.0 - new;
    let mut shares = PerChannel::from_fn(|ch| {
        if ch == channel {
            new
        } else if rest_old > GRADIENT_FLOOR {
            allocation.get(ch) * rest_new / rest_old
        } else {
            rest_new / 3.0
        }
    });
    // Guard against tiny negative values from the rescale.
    for &ch in &Channel::ALL {
        *shares.get_mut(ch) = shares.value(ch).max(0.0);
    }
    Allocation::from_weights(shares)
}

/// Monte Carlo cross-check of a gradient allocation against the grid
/// baseline.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub(crate) struct MonteCarloComparison {
    pub candidate_p50: f64,
    pub baseline_p50: f64,
    /// Relative performance vs the baseline (direction-aware; 1.0 = parity).
    pub relative: f64,
    /// True when relative performance clears the competitive ratio.
    pub competitive: bool,
}

/// Re-score `allocation` via Monte Carlo and report how it stacks up
/// against the grid baseline's p50.
pub(crate) fn compare_with_monte_carlo<R: Rng>(
    objective: &Objective,
    allocation: &Allocation,
    baseline_p50: f64,
    tuning: &TuningConfig,
    rng: &mut R,
) -> MonteCarloComparison {
    let band = objective.monte_carlo(allocation, tuning.mc_runs, rng);
    let relative = match objective.direction() {
        Direction::Maximize => {
            if baseline_p50.abs() < GRADIENT_FLOOR {
                1.0
            } else {
                band.p50 / baseline_p50
            }
        }
        // For minimization, beating the baseline means a smaller value.
        Direction::Minimize => {
            if band.p50.abs() < GRADIENT_FLOOR {
                1.0
            } else {
                baseline_p50 / band.p50
            }
        }
    };
    MonteCarloComparison {
        candidate_p50: band.p50,
        baseline_p50,
        relative,
        competitive: relative >= tuning.competitive_ratio,
    }
}

pub(crate) fn to_algorithm_result(
    output: &GradientOutput,
    comparison: Option<&MonteCarloComparison>,
    tuning: &TuningConfig,
) -> AlgorithmResult {
    let confidence = if output.converged {
        tuning.gradient_confidence_converged
    } else {
        tuning.gradient_confidence_unconverged
    };
    AlgorithmResult {
        algorithm: AlgorithmKind::Gradient,
        allocation: output.allocation,
        confidence,
        performance: output.performance,
        detail: Some(serde_json::json!({
            "iterations": output.iterations,
            "converged": output.converged,
            "monte_carlo": comparison,
        })),
    }
}
