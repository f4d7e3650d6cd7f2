//! Acquisition functions scoring candidate next-points.
//!
//! All scoring happens in "maximize space": the optimizer sign-adjusts and
//! standardizes observed values before fitting the surrogate, so Expected
//! Improvement, UCB and Probability of Improvement never need to know the
//! goal's direction here.

use serde::{Deserialize, Serialize};

use super::gp::Posterior;

const STD_FLOOR: f64 = 1e-12;

/// Acquisition function choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acquisition {
    /// `EI = (μ − best − ξ)·Φ(z) + σ·φ(z)` — the default.
    #[default]
    ExpectedImprovement,
    /// `UCB = μ + β·σ`.
    UpperConfidenceBound,
    /// `PI = Φ((μ − best − ξ) / σ)`.
    ProbabilityOfImprovement,
}

/// Score a candidate's posterior against the best observed value.
/// Higher is better for every variant.
pub(crate) fn score(
    acquisition: Acquisition,
    posterior: &Posterior,
    best: f64,
    exploration: f64,
    margin: f64,
) -> f64 {
    let std = posterior.variance.sqrt();
    let improvement = posterior.mean - best - margin;
    match acquisition {
        Acquisition::ExpectedImprovement => {
            if std < STD_FLOOR {
                return improvement.max(0.0);
            }
            let z = improvement / std;
            improvement * normal_cdf(z) + std * normal_pdf(z)
        }
        Acquisition::UpperConfidenceBound => posterior.mean + exploration * std,
        Acquisition::ProbabilityOfImprovement => {
            if std < STD_FLOOR {
                return if improvement > 0.0 { 1.0 } else { 0.0 };
            }
            normal_cdf(improvement / std)
        }
    }
}

pub(crate) fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

pub(crate) fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz & Stegun 7.1.26 rational approximation, |error| < 1.5e-7.
fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t) * (-x * x).exp();
    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erf_matches_known_values() {
        assert!((erf(0.0)).abs() < 1e-7);
        assert!((erf(1.0) - 0.8427007929).abs() < 1e-6);
        assert!((erf(-1.0) + 0.8427007929).abs() < 1e-6);
        assert!((erf(3.0) - 0.9999779).abs() < 1e-5);
    }

    #[test]
    fn cdf_is_monotone_and_bounded() {
        let mut prev = 0.0;
        for i in -40..=40 {
            let z = i as f64 / 10.0;
            let c = normal_cdf(z);
            assert!((0.0..=1.0).contains(&c), "cdf({z}) = {c}");
            assert!(c >= prev, "cdf must be nondecreasing");
            prev = c;
        }
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn ei_is_nonnegative() {
        for &(mean, var) in &[(0.0, 1.0), (2.0, 0.5), (-3.0, 0.1), (1.0, 0.0)] {
            let p = Posterior {
                mean,
                variance: var,
            };
            let v = score(Acquisition::ExpectedImprovement, &p, 1.0, 2.0, 0.01);
            assert!(v >= 0.0, "EI(mean={mean}, var={var}) = {v}");
        }
    }

    #[test]
    fn ei_prefers_promising_candidates() {
        let good = Posterior {
            mean: 2.0,
            variance: 0.2,
        };
        let bad = Posterior {
            mean: 0.2,
            variance: 0.2,
        };
        let ei_good = score(Acquisition::ExpectedImprovement, &good, 1.0, 2.0, 0.01);
        let ei_bad = score(Acquisition::ExpectedImprovement, &bad, 1.0, 2.0, 0.01);
        assert!(ei_good > ei_bad);
    }

    #[test]
    fn ucb_rewards_uncertainty() {
        let certain = Posterior {
            mean: 1.0,
            variance: 0.0,
        };
        let uncertain = Posterior {
            mean: 1.0,
            variance: 1.0,
        };
        let a = score(Acquisition::UpperConfidenceBound, &certain, 0.0, 2.0, 0.0);
        let b = score(Acquisition::UpperConfidenceBound, &uncertain, 0.0, 2.0, 0.0);
        assert!(b > a, "exploration bonus missing: {b} <= {a}");
    }

    #[test]
    fn pi_degenerates_to_step_at_zero_std() {
        let above = Posterior {
            mean: 2.0,
            variance: 0.0,
        };
        let below = Posterior {
            mean: 0.5,
            variance: 0.0,
        };
        assert_eq!(
            score(Acquisition::ProbabilityOfImprovement, &above, 1.0, 0.0, 0.01),
            1.0
        );
        assert_eq!(
            score(Acquisition::ProbabilityOfImprovement, &below, 1.0, 0.0, 0.01),
            0.0
        );
    }
}
