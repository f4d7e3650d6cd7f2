//! The orchestrating enhancement service.
//!
//! Per-request pipeline (no state survives a request):
//!
//! ```text
//! validate input
//!   └─► primary grid/MC (synchronous; the fallback for everything)
//!         └─► validators: gradient / bayesian / heuristic, each on its own
//!             blocking task with a per-algorithm timeout, all bounded by a
//!             global stage deadline; late results are abandoned and their
//!             loops cancelled
//!               └─► ensemble combine ─► confidence ─► optional external
//!                   validation ─► alternatives
//! ```
//!
//! Timeouts and internal validator failures degrade the result; only
//! invalid input and truly infeasible constraints fail the request.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::consts;
use crate::errors::{OptimizeError, Result};
use crate::optimizer::bayesian::{self, BayesianConfig};
use crate::optimizer::config::{EnhanceOptions, TuningConfig};
use crate::optimizer::confidence;
use crate::optimizer::constraints::Constraints;
use crate::optimizer::ensemble::{self, EnsembleOutcome};
use crate::optimizer::gradient::{self, GradientConfig};
use crate::optimizer::grid;
use crate::optimizer::heuristic;
use crate::optimizer::objective::Objective;
use crate::optimizer::validation::{SemanticValidator, ValidationContext};
use crate::optimizer::CancelToken;
use crate::types::{
    AlgorithmKind, AlgorithmResult, Allocation, Alternatives, Assumptions, Channel, ChannelPriors,
    ConfidenceMetrics, Direction, EnhancedModelResult, Goal, RankedAllocation, Severity,
    ValidationReport, ValidationVerdict, Warning, WarningCode,
};

/// Stateless per-request optimization orchestrator.
///
/// Holds only wiring (the optional external validator and algorithm
/// parameter overrides); every request builds its own objective,
/// constraints and RNGs, so concurrent requests never share mutable state.
#[derive(Default)]
pub struct EnhancementService {
    validator: Option<Arc<dyn SemanticValidator>>,
    bayesian: BayesianConfig,
    gradient: GradientConfig,
}

impl EnhancementService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire in an external semantic validator.
    pub fn with_validator(mut self, validator: Arc<dyn SemanticValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Override the Bayesian optimizer parameters.
    pub fn with_bayesian_config(mut self, config: BayesianConfig) -> Self {
        self.bayesian = config;
        self
    }

    /// Run the full enhancement pipeline.
    pub async fn enhance(
        &self,
        budget: f64,
        priors: ChannelPriors,
        assumptions: Assumptions,
        options: EnhanceOptions,
    ) -> Result<EnhancedModelResult> {
        validate_request(budget, &priors, &assumptions)?;

        let objective = Objective::new(budget, priors, &assumptions);
        let constraints = Constraints::from_assumptions(&assumptions);
        let seed = options.seed.unwrap_or_else(rand::random);
        let mut rng = SmallRng::seed_from_u64(seed);

        info!(
            budget,
            goal = %assumptions.goal.as_str(),
            level = ?options.level,
            "optimization request accepted"
        );

        // Primary grid/MC search; also the fallback when validators vanish.
        let (primary, baseline_p50) =
            match grid::optimize(&objective, &constraints, &options.tuning, &mut rng) {
                Ok(output) => {
                    let baseline = output.best.outcome.p50;
                    (
                        grid::to_algorithm_result(&output, &objective, &options.tuning),
                        baseline,
                    )
                }
                Err(OptimizeError::InfeasibleConstraints(msg)) => {
                    return self
                        .degraded_heuristic_result(
                            &objective,
                            &constraints,
                            &assumptions,
                            &options,
                            &msg,
                            &mut rng,
                        )
                        .await;
                }
                Err(other) => return Err(other),
            };

        // Parallel validation stage.
        let (validator_results, launched) = self
            .run_validators(objective, constraints, &options, baseline_p50, seed)
            .await;
        let completed = validator_results.len();

        let mut all_results = Vec::with_capacity(1 + completed);
        all_results.push(primary);
        all_results.extend(validator_results);

        let mut extra_warnings = Vec::new();
        if completed < launched {
            extra_warnings.push(Warning::new(
                WarningCode::ValidatorsIncomplete,
                Severity::Low,
                format!("{} of {} validator algorithms completed in time", completed, launched),
            ));
        }

        let combined = ensemble::combine(&all_results, objective.direction(), &options.tuning);

        // External semantic validation, timeout-wrapped and degradable.
        let external = self
            .external_validation(
                &combined.allocation,
                budget,
                &priors,
                &assumptions,
                &options,
                &mut extra_warnings,
            )
            .await;

        Ok(self.assemble(
            &objective,
            &assumptions,
            &options,
            all_results,
            combined,
            external,
            extra_warnings,
            &mut rng,
        ))
    }

    /// Launch the validator algorithms on blocking tasks, each with its own
    /// timeout and cancel token, and collect whatever completes before the
    /// stage deadline. Late tasks are cancelled and ignored, never awaited.
    async fn run_validators(
        &self,
        objective: Objective,
        constraints: Constraints,
        options: &EnhanceOptions,
        baseline_p50: f64,
        seed: u64,
    ) -> (Vec<AlgorithmResult>, usize) {
        let kinds = options.level.validators();
        let per_timeout = options.level.per_algorithm_timeout();
        let stage_timeout = options.stage_timeout();

        let (tx, mut rx) = mpsc::unbounded_channel::<AlgorithmResult>();
        let mut tokens = Vec::with_capacity(kinds.len());

        for (i, &kind) in kinds.iter().enumerate() {
            let cancel = CancelToken::new();
            tokens.push(cancel.clone());
            let tx = tx.clone();
            let tuning = options.tuning.clone();
            let bayes_config = self.bayesian;
            let gradient_config = self.gradient;
            let task_seed = seed.wrapping_add(i as u64 + 1);

            tokio::spawn(async move {
                let work_cancel = cancel.clone();
                let work = tokio::task::spawn_blocking(move || {
                    run_validator(
                        kind,
                        &objective,
                        &constraints,
                        &bayes_config,
                        &gradient_config,
                        &tuning,
                        baseline_p50,
                        task_seed,
                        &work_cancel,
                    )
                });
                match tokio::time::timeout(per_timeout, work).await {
                    Ok(Ok(Ok(result))) => {
                        let _ = tx.send(result);
                    }
                    Ok(Ok(Err(err))) => {
                        warn!(algorithm = %kind, error = %err, "validator failed, omitting its result");
                    }
                    Ok(Err(join_err)) => {
                        warn!(algorithm = %kind, error = %join_err, "validator task panicked");
                    }
                    Err(_) => {
                        cancel.cancel();
                        let err = OptimizeError::AlgorithmTimeout {
                            algorithm: kind,
                            timeout_ms: per_timeout.as_millis() as u64,
                        };
                        warn!(error = %err, "validator timed out, abandoning");
                    }
                }
            });
        }
        drop(tx);

        let deadline = tokio::time::Instant::now() + stage_timeout;
        let mut collected = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(result)) => {
                    debug!(algorithm = %result.algorithm, "validator result received");
                    collected.push(result);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        completed = collected.len(),
                        launched = kinds.len(),
                        "validation stage deadline elapsed, abandoning pending validators"
                    );
                    for token in &tokens {
                        token.cancel();
                    }
                    break;
                }
            }
        }
        // Arrival order is nondeterministic; fix it so the downstream
        // floating-point combination is reproducible for a given seed.
        collected.sort_by_key(|r| r.algorithm as u8);
        (collected, kinds.len())
    }

    async fn external_validation(
        &self,
        allocation: &Allocation,
        budget: f64,
        priors: &ChannelPriors,
        assumptions: &Assumptions,
        options: &EnhanceOptions,
        warnings: &mut Vec<Warning>,
    ) -> Option<ValidationVerdict> {
        if !options.external_validation_enabled() {
            return None;
        }
        let Some(validator) = &self.validator else {
            debug!("external validation requested but no validator is wired in");
            return None;
        };
        let context = ValidationContext {
            budget,
            priors,
            assumptions,
        };
        let timeout = Duration::from_millis(options.tuning.external_timeout_ms);
        match tokio::time::timeout(timeout, validator.validate(allocation, context)).await {
            Ok(Ok(verdict)) if verdict.confidence.is_finite() => {
                let mut verdict = verdict;
                verdict.confidence = verdict.confidence.clamp(0.0, 1.0);
                Some(verdict)
            }
            Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
                warnings.push(Warning::new(
                    WarningCode::ExternalValidationUnavailable,
                    Severity::Low,
                    "external semantic validation unavailable; confidence uses local signals only",
                ));
                None
            }
        }
    }

    /// Fallback when the grid finds zero feasible candidates: relax to the
    /// heuristic allocation if (and only if) it genuinely satisfies the
    /// stated constraints.
    async fn degraded_heuristic_result(
        &self,
        objective: &Objective,
        constraints: &Constraints,
        assumptions: &Assumptions,
        options: &EnhanceOptions,
        reason: &str,
        rng: &mut SmallRng,
    ) -> Result<EnhancedModelResult> {
        let allocation = heuristic::optimize(&objective.priors, constraints);
        if !constraints.respects_default(&allocation) {
            return Err(OptimizeError::InfeasibleConstraints(reason.to_string()));
        }
        warn!(reason, "grid infeasible at 10% granularity; degrading to heuristic-only");

        let result = heuristic::to_algorithm_result(objective, constraints, &options.tuning);
        let combined = ensemble::combine(
            std::slice::from_ref(&result),
            objective.direction(),
            &options.tuning,
        );
        let warnings = vec![Warning::new(
            WarningCode::DegradedPipeline,
            Severity::High,
            format!("primary optimizer found no feasible grid candidate ({reason}); heuristic-only result"),
        )];
        Ok(self.assemble(
            objective,
            assumptions,
            options,
            vec![result],
            combined,
            None,
            warnings,
            rng,
        ))
    }

    /// Final assembly shared by the normal and degraded paths.
    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        objective: &Objective,
        assumptions: &Assumptions,
        options: &EnhanceOptions,
        all_results: Vec<AlgorithmResult>,
        combined: EnsembleOutcome,
        external: Option<ValidationVerdict>,
        mut warnings: Vec<Warning>,
        rng: &mut SmallRng,
    ) -> EnhancedModelResult {
        let allocation = combined.allocation;
        let performance = objective.value(&allocation);
        let outcome = objective.monte_carlo(&allocation, options.tuning.mc_runs, rng);

        let stability = confidence::stability(&all_results, &allocation, &options.tuning);
        let benchmark = if options.validate_against_benchmarks {
            confidence::benchmark_comparison(&allocation, &objective.priors, &options.tuning)
        } else {
            // Explicit zero-deviation default, never a fabricated score.
            Default::default()
        };
        let benchmark_for_blend = options.validate_against_benchmarks.then_some(&benchmark);

        let (overall, per_channel) = confidence::composite(
            &all_results,
            &combined.consensus,
            stability,
            benchmark_for_blend,
            external.as_ref().map(|v| v.confidence),
            &options.tuning,
        );

        let alternatives = if options.include_alternatives {
            build_alternatives(
                &all_results,
                &allocation,
                objective.direction(),
                &options.tuning,
            )
        } else {
            Alternatives {
                top_allocations: Vec::new(),
                note: Some("alternatives were not requested for this run".to_string()),
            }
        };

        warnings.extend(combined.warnings);

        info!(
            performance,
            confidence = overall,
            algorithms = all_results.len(),
            "optimization request complete"
        );

        EnhancedModelResult {
            goal: assumptions.goal,
            budget: objective.budget,
            allocation,
            performance,
            outcome,
            confidence: ConfidenceMetrics {
                overall,
                per_channel,
                stability,
                algorithms: all_results,
                consensus: combined.consensus,
            },
            validation: ValidationReport {
                benchmark,
                external,
                warnings,
            },
            alternatives,
        }
    }
}

/// Dispatch one validator algorithm. Runs on a blocking thread.
#[allow(clippy::too_many_arguments)]
fn run_validator(
    kind: AlgorithmKind,
    objective: &Objective,
    constraints: &Constraints,
    bayes_config: &BayesianConfig,
    gradient_config: &GradientConfig,
    tuning: &TuningConfig,
    baseline_p50: f64,
    seed: u64,
    cancel: &CancelToken,
) -> Result<AlgorithmResult> {
    let mut rng = SmallRng::seed_from_u64(seed);
    match kind {
        AlgorithmKind::Gradient => {
            let output = gradient::optimize(objective, constraints, gradient_config);
            let comparison = gradient::compare_with_monte_carlo(
                objective,
                &output.allocation,
                baseline_p50,
                tuning,
                &mut rng,
            );
            Ok(gradient::to_algorithm_result(
                &output,
                Some(&comparison),
                tuning,
            ))
        }
        AlgorithmKind::Bayesian => {
            let output = bayesian::optimize(objective, constraints, bayes_config, &mut rng, cancel)?;
            Ok(bayesian::to_algorithm_result(&output, bayes_config))
        }
        AlgorithmKind::Heuristic => Ok(heuristic::to_algorithm_result(
            objective,
            constraints,
            tuning,
        )),
        AlgorithmKind::GridMonteCarlo => Err(OptimizeError::AlgorithmFailure {
            algorithm: kind,
            message: "the primary algorithm is not a validator".to_string(),
        }),
    }
}

/// Eager input validation: every optimizer may assume these invariants.
fn validate_request(budget: f64, priors: &ChannelPriors, assumptions: &Assumptions) -> Result<()> {
    if !budget.is_finite() || budget <= 0.0 {
        return Err(OptimizeError::invalid_input(
            "budget",
            format!("must be a positive finite number, got {budget}"),
        ));
    }

    for &ch in &Channel::ALL {
        let m = priors.get(ch);
        check_interval(&format!("priors.{ch}.cpm"), m.cpm.low, m.cpm.high)?;
        if m.cpm.low <= 0.0 {
            return Err(OptimizeError::invalid_input(
                format!("priors.{ch}.cpm"),
                "cpm must be strictly positive",
            ));
        }
        check_interval(&format!("priors.{ch}.ctr"), m.ctr.low, m.ctr.high)?;
        check_rate(&format!("priors.{ch}.ctr"), m.ctr.low, m.ctr.high)?;
        check_interval(&format!("priors.{ch}.cvr"), m.cvr.low, m.cvr.high)?;
        check_rate(&format!("priors.{ch}.cvr"), m.cvr.low, m.cvr.high)?;
    }

    if assumptions.goal == Goal::Revenue {
        match assumptions.avg_deal_size {
            Some(v) if v.is_finite() && v > 0.0 => {}
            _ => {
                return Err(OptimizeError::invalid_input(
                    "avgDealSize",
                    "required and must be positive when goal is revenue",
                ));
            }
        }
    }
    if let Some(target) = assumptions.target_cac {
        if !target.is_finite() || target <= 0.0 {
            return Err(OptimizeError::invalid_input(
                "targetCAC",
                "must be positive when provided",
            ));
        }
    }

    for &ch in &Channel::ALL {
        if let Some(min) = assumptions.min_pct.get(ch) {
            if !(0.0..=1.0).contains(&min) {
                return Err(OptimizeError::invalid_input(
                    format!("minPct.{ch}"),
                    "must be a fraction in [0, 1]",
                ));
            }
        }
        if let Some(max) = assumptions.max_pct.get(ch) {
            if !(0.0..=1.0).contains(&max) {
                return Err(OptimizeError::invalid_input(
                    format!("maxPct.{ch}"),
                    "must be a fraction in [0, 1]",
                ));
            }
        }
        if let (Some(min), Some(max)) = (assumptions.min_pct.get(ch), assumptions.max_pct.get(ch)) {
            if min > max + consts::CONSTRAINT_TOLERANCE {
                return Err(OptimizeError::invalid_input(
                    format!("minPct.{ch}"),
                    format!("floor {min} exceeds ceiling {max}"),
                ));
            }
        }
    }
    Ok(())
}

fn check_interval(field: &str, low: f64, high: f64) -> Result<()> {
    if !low.is_finite() || !high.is_finite() {
        return Err(OptimizeError::invalid_input(field, "bounds must be finite"));
    }
    if low > high {
        return Err(OptimizeError::invalid_input(
            field,
            format!("low {low} exceeds high {high}"),
        ));
    }
    Ok(())
}

fn check_rate(field: &str, low: f64, high: f64) -> Result<()> {
    if low < 0.0 || high > 1.0 {
        return Err(OptimizeError::invalid_input(
            field,
            "rates must lie within [0, 1]",
        ));
    }
    Ok(())
}

/// Top-3 distinct allocations by the performance/confidence blend,
/// excluding the chosen final allocation.
fn build_alternatives(
    results: &[AlgorithmResult],
    chosen: &Allocation,
    direction: Direction,
    tuning: &TuningConfig,
) -> Alternatives {
    let mut best = direction.worst();
    let mut worst = match direction {
        Direction::Maximize => f64::INFINITY,
        Direction::Minimize => f64::NEG_INFINITY,
    };
    for r in results {
        if direction.better(r.performance, best) {
            best = r.performance;
        }
        if direction.better(worst, r.performance) {
            worst = r.performance;
        }
    }
    let range = (best - worst).abs();

    let mut scored: Vec<(f64, &AlgorithmResult)> = results
        .iter()
        .map(|r| {
            let norm = if range < 1e-12 {
                1.0
            } else {
                match direction {
                    Direction::Maximize => (r.performance - worst) / range,
                    Direction::Minimize => (worst - r.performance) / range,
                }
            };
            let score = tuning.alt_perf_weight * norm
                + tuning.alt_conf_weight * r.confidence.clamp(0.0, 1.0);
            (score, r)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut top: Vec<RankedAllocation> = Vec::new();
    for (score, result) in scored {
        if top.len() == 3 {
            break;
        }
        if result.allocation.approx_eq(chosen, consts::DEDUP_TOLERANCE) {
            continue;
        }
        if top
            .iter()
            .any(|t| t.allocation.approx_eq(&result.allocation, consts::DEDUP_TOLERANCE))
        {
            continue;
        }
        top.push(RankedAllocation {
            allocation: result.allocation,
            score,
            performance: result.performance,
            confidence: result.confidence,
            source: result.algorithm,
            reasoning: format!(
                "{} proposed this split with performance {:.2} and confidence {:.2}",
                result.algorithm, result.performance, result.confidence
            ),
        });
    }

    Alternatives {
        top_allocations: top,
        note: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelMetrics, Interval, PerChannel};

    fn priors() -> ChannelPriors {
        PerChannel::from_fn(|_| ChannelMetrics {
            cpm: Interval::new(10.0, 20.0),
            ctr: Interval::new(0.02, 0.05),
            cvr: Interval::new(0.1, 0.3),
        })
    }

    #[test]
    fn rejects_nonpositive_budget() {
        let err = validate_request(0.0, &priors(), &Assumptions::new(Goal::Demos)).unwrap_err();
        assert!(matches!(err, OptimizeError::InvalidInput { ref field, .. } if field == "budget"));
    }

    #[test]
    fn rejects_inverted_interval() {
        let mut bad = priors();
        bad.meta.ctr = Interval::new(0.5, 0.1);
        let err = validate_request(100.0, &bad, &Assumptions::new(Goal::Demos)).unwrap_err();
        assert!(
            matches!(err, OptimizeError::InvalidInput { ref field, .. } if field == "priors.meta.ctr"),
            "got {err:?}"
        );
    }

    #[test]
    fn rejects_out_of_range_cvr() {
        let mut bad = priors();
        bad.tiktok.cvr = Interval::new(0.1, 1.5);
        let err = validate_request(100.0, &bad, &Assumptions::new(Goal::Demos)).unwrap_err();
        assert!(
            matches!(err, OptimizeError::InvalidInput { ref field, .. } if field == "priors.tiktok.cvr")
        );
    }

    #[test]
    fn revenue_requires_deal_size() {
        let err = validate_request(100.0, &priors(), &Assumptions::new(Goal::Revenue)).unwrap_err();
        assert!(matches!(err, OptimizeError::InvalidInput { ref field, .. } if field == "avgDealSize"));

        let mut ok = Assumptions::new(Goal::Revenue);
        ok.avg_deal_size = Some(500.0);
        assert!(validate_request(100.0, &priors(), &ok).is_ok());
    }

    #[test]
    fn rejects_contradictory_channel_bounds() {
        let mut a = Assumptions::new(Goal::Demos);
        a.min_pct.set(Channel::Google, 0.6);
        a.max_pct.set(Channel::Google, 0.2);
        let err = validate_request(100.0, &priors(), &a).unwrap_err();
        assert!(matches!(err, OptimizeError::InvalidInput { .. }), "got {err:?}");
    }

    #[test]
    fn timeout_error_names_the_algorithm() {
        let err = OptimizeError::AlgorithmTimeout {
            algorithm: AlgorithmKind::Bayesian,
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "algorithm bayesian timed out after 250 ms");
    }

    #[test]
    fn alternatives_exclude_the_chosen_allocation() {
        let chosen = Allocation::equal_split();
        let results = vec![
            AlgorithmResult {
                algorithm: AlgorithmKind::GridMonteCarlo,
                allocation: chosen,
                confidence: 0.9,
                performance: 100.0,
                detail: None,
            },
            AlgorithmResult {
                algorithm: AlgorithmKind::Gradient,
                allocation: Allocation::from_shares(PerChannel {
                    google: 0.5,
                    meta: 0.2,
                    tiktok: 0.2,
                    linkedin: 0.1,
                }),
                confidence: 0.75,
                performance: 110.0,
                detail: None,
            },
        ];
        let alts = build_alternatives(
            &results,
            &chosen,
            Direction::Maximize,
            &TuningConfig::default(),
        );
        assert_eq!(alts.top_allocations.len(), 1);
        assert_eq!(alts.top_allocations[0].source, AlgorithmKind::Gradient);
    }

    #[test]
    fn alternatives_deduplicate_structurally() {
        let chosen = Allocation::from_shares(PerChannel {
            google: 0.7,
            meta: 0.1,
            tiktok: 0.1,
            linkedin: 0.1,
        });
        let near_equal_a = Allocation::from_shares(PerChannel {
            google: 0.251,
            meta: 0.249,
            tiktok: 0.25,
            linkedin: 0.25,
        });
        let near_equal_b = Allocation::equal_split();
        let results = vec![
            AlgorithmResult {
                algorithm: AlgorithmKind::Gradient,
                allocation: near_equal_a,
                confidence: 0.7,
                performance: 90.0,
                detail: None,
            },
            AlgorithmResult {
                algorithm: AlgorithmKind::Heuristic,
                allocation: near_equal_b,
                confidence: 0.7,
                performance: 91.0,
                detail: None,
            },
        ];
        let alts = build_alternatives(
            &results,
            &chosen,
            Direction::Maximize,
            &TuningConfig::default(),
        );
        assert_eq!(
            alts.top_allocations.len(),
            1,
            "structural duplicates must collapse: {:?}",
            alts.top_allocations
        );
    }
}
