//! Graphical lasso by block coordinate descent
//!
//! Each sweep visits every column, solves an L1-penalized regression of that
//! column on the others using the current covariance block, then updates the
//! matching row and column of both covariance and precision.

use super::linalg::inverse_spd;
use crate::structs::{RegcovError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Graphical lasso at a fixed regularization strength
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphicalLasso {
    pub alpha: f64,
    pub max_iter: usize,
    /// Duality-gap tolerance of the outer loop
    pub tol: f64,
    /// Relative coefficient-change tolerance of the inner lasso
    pub enet_tol: f64,
}

impl Default for GraphicalLasso {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            max_iter: 100,
            tol: 1e-4,
            enet_tol: 1e-4,
        }
    }
}

/// Covariance and precision returned by [`GraphicalLasso::fit`]
#[derive(Debug, Clone)]
pub struct GlassoFit {
    pub covariance: Array2<f64>,
    pub precision: Array2<f64>,
    pub n_iter: usize,
    pub converged: bool,
    pub dual_gap: f64,
}

impl GraphicalLasso {
    #[cfg(test)]
    pub(crate) fn with_alpha(alpha: f64) -> Self {
        Self {
            alpha,
            ..Self::default()
        }
    }

    /// Fit on an empirical covariance, optionally warm-started from `cov_init`
    ///
    /// # Errors
    /// Returns error if the starting covariance is not positive definite or
    /// the precision matrix becomes non-finite.
    pub fn fit(&self, emp_cov: &Array2<f64>, cov_init: Option<&Array2<f64>>) -> Result<GlassoFit> {
        let n = emp_cov.nrows();
        if emp_cov.ncols() != n {
            return Err(RegcovError::ShapeMismatch(format!(
                "covariance must be square, got {:?}",
                emp_cov.dim()
            )));
        }
        if !(self.alpha >= 0.0 && self.alpha.is_finite()) {
            return Err(RegcovError::InvalidParameter(format!(
                "alpha must be a non-negative number, got {}",
                self.alpha
            )));
        }

        if self.alpha == 0.0 {
            let precision = inverse_spd(emp_cov)?;
            let dual_gap = dual_gap(emp_cov, &precision, 0.0);
            return Ok(GlassoFit {
                covariance: emp_cov.clone(),
                precision,
                n_iter: 0,
                converged: true,
                dual_gap,
            });
        }

        let mut covariance = cov_init.map_or_else(|| emp_cov.clone(), ToOwned::to_owned);
        covariance *= 0.95;
        for i in 0..n {
            covariance[[i, i]] = emp_cov[[i, i]];
        }
        let mut precision = inverse_spd(&covariance)?;

        let mut n_iter = 0;
        let mut converged = false;
        let mut gap = f64::INFINITY;

        for iteration in 0..self.max_iter {
            for idx in 0..n {
                self.update_column(idx, emp_cov, &mut covariance, &mut precision);
            }
            n_iter = iteration + 1;

            if !precision.iter().all(|v| v.is_finite()) {
                return Err(RegcovError::NotConverged(format!(
                    "non-finite precision at alpha={:.4e}; the system may be too ill-conditioned",
                    self.alpha
                )));
            }

            gap = dual_gap(emp_cov, &precision, self.alpha);
            debug!(iteration, alpha = self.alpha, gap, "graphical lasso sweep");
            if gap.abs() < self.tol {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                alpha = self.alpha,
                max_iter = self.max_iter,
                gap,
                "graphical lasso did not converge"
            );
        }

        Ok(GlassoFit {
            covariance,
            precision,
            n_iter,
            converged,
            dual_gap: gap,
        })
    }

    fn update_column(
        &self,
        idx: usize,
        emp_cov: &Array2<f64>,
        covariance: &mut Array2<f64>,
        precision: &mut Array2<f64>,
    ) {
        let n = emp_cov.nrows();
        let others: Vec<usize> = (0..n).filter(|&j| j != idx).collect();

        let sub_covariance = covariance
            .select(Axis(0), &others)
            .select(Axis(1), &others);
        let row = emp_cov.row(idx).select(Axis(0), &others);

        let denom = precision[[idx, idx]] + 1000.0 * f64::EPSILON;
        let mut coefs: Array1<f64> = others.iter().map(|&j| -precision[[j, idx]] / denom).collect();
        lasso_gram_cd(
            &mut coefs,
            self.alpha,
            &sub_covariance,
            row.view(),
            self.max_iter,
            self.enet_tol,
        );

        let column: Array1<f64> = others.iter().map(|&j| covariance[[j, idx]]).collect();
        let p_ii = 1.0 / (covariance[[idx, idx]] - column.dot(&coefs));
        precision[[idx, idx]] = p_ii;
        for (k, &j) in others.iter().enumerate() {
            let v = -p_ii * coefs[k];
            precision[[j, idx]] = v;
            precision[[idx, j]] = v;
        }

        let new_column = sub_covariance.dot(&coefs);
        for (k, &j) in others.iter().enumerate() {
            covariance[[idx, j]] = new_column[k];
            covariance[[j, idx]] = new_column[k];
        }
    }
}

/// Coordinate descent for `min ½ wᵀQw − qᵀw + α‖w‖₁`
fn lasso_gram_cd(
    coefs: &mut Array1<f64>,
    alpha: f64,
    gram: &Array2<f64>,
    q: ArrayView1<f64>,
    max_iter: usize,
    tol: f64,
) {
    let m = coefs.len();
    let mut h = gram.dot(&*coefs);

    for _ in 0..max_iter {
        let mut w_max = 0.0_f64;
        let mut d_w_max = 0.0_f64;

        for j in 0..m {
            let q_jj = gram[[j, j]];
            if q_jj == 0.0 {
                continue;
            }
            let w_old = coefs[j];
            let tmp = q[j] - h[j] + q_jj * w_old;
            let w_new = soft_threshold(tmp, alpha) / q_jj;

            if w_new != w_old {
                h.scaled_add(w_new - w_old, &gram.column(j));
                coefs[j] = w_new;
            }
            d_w_max = d_w_max.max((w_new - w_old).abs());
            w_max = w_max.max(w_new.abs());
        }

        if w_max == 0.0 || d_w_max / w_max < tol {
            break;
        }
    }
}

fn soft_threshold(x: f64, threshold: f64) -> f64 {
    x.signum() * (x.abs() - threshold).max(0.0)
}

/// Duality gap `tr(SΘ) − p + α(‖Θ‖₁ − ‖diag Θ‖₁)`
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn dual_gap(emp_cov: &Array2<f64>, precision: &Array2<f64>, alpha: f64) -> f64 {
    let p = precision.nrows() as f64;
    let trace_term: f64 = emp_cov.iter().zip(precision.iter()).map(|(s, t)| s * t).sum();
    let off_diagonal_l1: f64 = precision
        .indexed_iter()
        .filter(|((i, j), _)| i != j)
        .map(|(_, v)| v.abs())
        .sum();
    trace_term - p + alpha * off_diagonal_l1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::empirical::empirical_covariance;
    use crate::covariance::linalg::{inverse_spd, max_identity_deviation};
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, StandardNormal};

    fn sample_covariance() -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(5);
        let x: Array2<f64> = Array2::from_shape_fn((200, 4), |_| StandardNormal.sample(&mut rng));
        let mixing = array![
            [1.0, 0.5, 0.0, 0.0],
            [0.0, 1.0, 0.3, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.2, 0.0, 0.0, 1.0]
        ];
        empirical_covariance(&x.dot(&mixing))
    }

    #[test]
    fn test_fit_symmetric_and_inverse() {
        let emp = sample_covariance();
        let fit = GraphicalLasso::with_alpha(0.05).fit(&emp, None).expect("fit");

        assert!(fit.converged);
        for i in 0..4 {
            assert!(fit.covariance[[i, i]] >= 0.0);
            for j in 0..4 {
                assert!((fit.covariance[[i, j]] - fit.covariance[[j, i]]).abs() < 1e-10);
                assert!((fit.precision[[i, j]] - fit.precision[[j, i]]).abs() < 1e-10);
            }
        }
        assert!(max_identity_deviation(&fit.covariance.dot(&fit.precision)) < 1e-2);
    }

    #[test]
    fn test_alpha_zero_is_inverse_of_empirical() {
        let emp = sample_covariance();
        let fit = GraphicalLasso::with_alpha(0.0).fit(&emp, None).expect("fit");
        let expected = inverse_spd(&emp).expect("inverse");
        for (a, b) in fit.precision.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_large_alpha_gives_diagonal_precision() {
        let emp = sample_covariance();
        let alpha = crate::covariance::empirical::alpha_max(&emp) * 1.01;
        let fit = GraphicalLasso::with_alpha(alpha).fit(&emp, None).expect("fit");
        for i in 0..4 {
            for j in 0..4 {
                if i != j {
                    assert!(fit.precision[[i, j]].abs() < 1e-8);
                }
            }
        }
    }

    #[test]
    fn test_larger_alpha_is_sparser() {
        let emp = sample_covariance();
        let count_zeros = |p: &Array2<f64>| p.iter().filter(|v| v.abs() < 1e-10).count();
        let weak = GraphicalLasso::with_alpha(0.01).fit(&emp, None).expect("fit");
        let strong = GraphicalLasso::with_alpha(0.2).fit(&emp, None).expect("fit");
        assert!(count_zeros(&strong.precision) >= count_zeros(&weak.precision));
    }

    #[test]
    fn test_singular_start_is_reported() {
        let emp = array![[1.0, 1.0], [1.0, 1.0]];
        let fit = GraphicalLasso::with_alpha(0.0).fit(&emp, None);
        assert!(matches!(fit, Err(RegcovError::NotPositiveDefinite(_))));
    }

    #[test]
    fn test_soft_threshold() {
        assert!((soft_threshold(3.0, 1.0) - 2.0).abs() < 1e-15);
        assert!((soft_threshold(-3.0, 1.0) + 2.0).abs() < 1e-15);
        assert!(soft_threshold(0.5, 1.0).abs() < 1e-15);
    }
}
