//! Gaussian-process surrogate with an RBF kernel.
//!
//! The kernel matrix stays small (bounded by the observation count, ≤ ~85
//! for the default budget), so the posterior uses explicit dense linear
//! algebra: Gauss–Jordan inversion with partial pivoting, regularizing
//! near-zero pivots instead of failing.

use tracing::debug;

use crate::consts;

/// `k(x1, x2) = variance · exp(−‖x1−x2‖² / (2·length_scale²))`, computed
/// over the four channel-fraction coordinates.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RbfKernel {
    pub variance: f64,
    pub length_scale: f64,
    /// Jitter added to the training diagonal for numerical stability.
    pub noise: f64,
}

impl RbfKernel {
    pub(crate) fn eval(&self, a: &[f64; 4], b: &[f64; 4]) -> f64 {
        let dist_sq: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
        self.variance * (-dist_sq / (2.0 * self.length_scale * self.length_scale)).exp()
    }
}

/// GP posterior at one query point.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub(crate) struct Posterior {
    pub mean: f64,
    pub variance: f64,
}

/// Fitted GP over observed (allocation, value) pairs.
#[derive(Debug, Clone)]
pub(crate) struct GaussianProcess {
    kernel: RbfKernel,
    train_x: Vec<[f64; 4]>,
    k_inv: Vec<Vec<f64>>,
    /// `K⁻¹ y`, precomputed for mean prediction.
    alpha: Vec<f64>,
}

impl GaussianProcess {
    /// Fit on the full training set. Never fails: ill-conditioned kernel
    /// matrices are regularized during inversion.
    pub(crate) fn fit(kernel: RbfKernel, xs: &[[f64; 4]], ys: &[f64]) -> Self {
        debug_assert_eq!(xs.len(), ys.len());
        let n = xs.len();
        let mut k = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                k[i][j] = kernel.eval(&xs[i], &xs[j]);
            }
            k[i][i] += kernel.noise;
        }
        let k_inv = invert(k);
        let alpha = mat_vec(&k_inv, ys);
        Self {
            kernel,
            train_x: xs.to_vec(),
            k_inv,
            alpha,
        }
    }

    /// Posterior mean and variance at `x`.
    pub(crate) fn predict(&self, x: &[f64; 4]) -> Posterior {
        let k_star: Vec<f64> = self.train_x.iter().map(|xi| self.kernel.eval(x, xi)).collect();
        let mean: f64 = k_star.iter().zip(&self.alpha).map(|(k, a)| k * a).sum();
        let v = mat_vec(&self.k_inv, &k_star);
        let explained: f64 = k_star.iter().zip(&v).map(|(k, vi)| k * vi).sum();
        let variance = (self.kernel.eval(x, x) - explained).max(0.0);
        Posterior { mean, variance }
    }
}

fn mat_vec(m: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    m.iter()
        .map(|row| row.iter().zip(v).map(|(a, b)| a * b).sum())
        .collect()
}

/// Gauss–Jordan inversion with partial pivoting. A pivot below
/// [`consts::PIVOT_EPSILON`] gets bumped by [`consts::PIVOT_REGULARIZATION`]
/// rather than aborting the fit.
fn invert(mut m: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
    let n = m.len();
    let mut inv = vec![vec![0.0; n]; n];
    for (i, row) in inv.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    for col in 0..n {
        // Partial pivot: largest magnitude in this column, at or below the
        // diagonal.
        let mut pivot_row = col;
        for row in (col + 1)..n {
            if m[row][col].abs() > m[pivot_row][col].abs() {
                pivot_row = row;
            }
        }
        if pivot_row != col {
            m.swap(col, pivot_row);
            inv.swap(col, pivot_row);
        }

        let mut pivot = m[col][col];
        if pivot.abs() < consts::PIVOT_EPSILON {
            debug!(col, pivot, "near-singular kernel matrix, regularizing pivot");
            m[col][col] += consts::PIVOT_REGULARIZATION;
            pivot = m[col][col];
        }

        for j in 0..n {
            m[col][j] /= pivot;
            inv[col][j] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = m[row][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                m[row][j] -= factor * m[col][j];
                inv[row][j] -= factor * inv[col][j];
            }
        }
    }
    inv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel() -> RbfKernel {
        RbfKernel {
            variance: 1.0,
            length_scale: 0.5,
            noise: 1e-6,
        }
    }

    #[test]
    fn kernel_is_max_at_zero_distance() {
        let k = kernel();
        let x = [0.25, 0.25, 0.25, 0.25];
        let y = [0.5, 0.3, 0.1, 0.1];
        assert_eq!(k.eval(&x, &x), 1.0);
        assert!(k.eval(&x, &y) < 1.0);
        assert!(k.eval(&x, &y) > 0.0);
    }

    #[test]
    fn invert_recovers_identity() {
        let m = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let inv = invert(m.clone());
        // m · m⁻¹ = I
        for i in 0..2 {
            for j in 0..2 {
                let prod: f64 = (0..2).map(|k| m[i][k] * inv[k][j]).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (prod - expected).abs() < 1e-9,
                    "entry ({i},{j}) = {prod}, expected {expected}"
                );
            }
        }
    }

    #[test]
    fn invert_survives_singular_input() {
        // Rank-deficient matrix: regularization must keep the result finite.
        let m = vec![vec![1.0, 1.0], vec![1.0, 1.0]];
        let inv = invert(m);
        for row in &inv {
            for v in row {
                assert!(v.is_finite(), "regularized inverse must be finite");
            }
        }
    }

    #[test]
    fn posterior_interpolates_observations() {
        let xs = vec![
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.25, 0.25, 0.25, 0.25],
        ];
        let ys = vec![3.0, 1.0, 2.0];
        let gp = GaussianProcess::fit(kernel(), &xs, &ys);
        for (x, y) in xs.iter().zip(&ys) {
            let p = gp.predict(x);
            assert!(
                (p.mean - y).abs() < 0.01,
                "posterior mean {} should be near observation {}",
                p.mean,
                y
            );
            assert!(p.variance < 0.01, "variance at observed point: {}", p.variance);
        }
    }

    #[test]
    fn posterior_variance_grows_away_from_data() {
        let xs = vec![[1.0, 0.0, 0.0, 0.0]];
        let ys = vec![5.0];
        let gp = GaussianProcess::fit(kernel(), &xs, &ys);
        let near = gp.predict(&[0.9, 0.1, 0.0, 0.0]).variance;
        let far = gp.predict(&[0.0, 0.0, 0.0, 1.0]).variance;
        assert!(far > near, "far {} should exceed near {}", far, near);
        assert!(far <= 1.0 + 1e-9, "variance bounded by kernel variance");
    }
}
