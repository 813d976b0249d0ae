//! Graphical lasso with the regularization strength chosen by cross-validation
//!
//! A coarse log-spaced grid of alphas is scored by held-out log-likelihood
//! over contiguous K folds, then refined around the best point a fixed number
//! of times. The final model is fit on all observations.

use super::empirical::{alpha_max, empirical_covariance, log_likelihood};
use super::glasso::GraphicalLasso;
use crate::structs::{CovarianceEstimate, CvPoint, RegcovError, Result};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Display name used in figure titles
pub const ESTIMATOR_NAME: &str = "Graph Lasso CV";

/// Cross-validated graphical lasso
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicalLassoCv {
    /// Grid points per refinement
    pub n_alphas: usize,
    pub n_refinements: usize,
    pub n_folds: usize,
    pub max_iter: usize,
    pub tol: f64,
    pub enet_tol: f64,
}

impl Default for GraphicalLassoCv {
    fn default() -> Self {
        Self {
            n_alphas: 4,
            n_refinements: 4,
            n_folds: 3,
            max_iter: 100,
            tol: 1e-4,
            enet_tol: 1e-4,
        }
    }
}

/// One alpha with its per-fold held-out scores
struct PathPoint {
    alpha: f64,
    scores: Vec<f64>,
}

impl PathPoint {
    #[allow(clippy::cast_precision_loss)]
    fn mean_score(&self) -> f64 {
        if self.scores.is_empty() {
            return f64::NEG_INFINITY;
        }
        self.scores.iter().sum::<f64>() / self.scores.len() as f64
    }
}

impl GraphicalLassoCv {
    fn estimator(&self, alpha: f64) -> GraphicalLasso {
        GraphicalLasso {
            alpha,
            max_iter: self.max_iter,
            tol: self.tol,
            enet_tol: self.enet_tol,
        }
    }

    /// Fit on (T, R) observations
    ///
    /// # Errors
    /// Returns error if T <= R, the parameters are invalid, every
    /// cross-validation fit failed, or the final fit fails.
    pub fn fit(&self, x: &Array2<f64>) -> Result<CovarianceEstimate> {
        let (n_samples, n_features) = x.dim();
        if n_samples <= n_features {
            return Err(RegcovError::InsufficientSamples {
                samples: n_samples,
                features: n_features,
            });
        }
        if self.n_alphas < 2 {
            return Err(RegcovError::InvalidParameter(format!(
                "need at least 2 alphas per grid, got {}",
                self.n_alphas
            )));
        }
        if self.n_folds < 2 || self.n_folds > n_samples {
            return Err(RegcovError::InvalidParameter(format!(
                "number of folds must lie in [2, {n_samples}], got {}",
                self.n_folds
            )));
        }

        let emp_cov = empirical_covariance(x);
        let alpha_1 = alpha_max(&emp_cov);
        if alpha_1 <= 0.0 {
            // Uncorrelated observations: every alpha gives the same diagonal model
            let fit = self.estimator(0.0).fit(&emp_cov, None)?;
            return Ok(CovarianceEstimate {
                covariance: fit.covariance,
                precision: fit.precision,
                alpha: 0.0,
                cv_path: Vec::new(),
                n_iter: fit.n_iter,
                converged: fit.converged,
            });
        }

        let folds = kfold(n_samples, self.n_folds);
        let mut alphas = logspace(alpha_1, 1e-2 * alpha_1, self.n_alphas);
        let mut path: Vec<PathPoint> = Vec::new();
        let mut best_index = 0;

        for refinement in 0..self.n_refinements.max(1) {
            let mut fold_scores = vec![Vec::with_capacity(folds.len()); alphas.len()];
            for (train, test) in &folds {
                let scores = self.path_scores(
                    &x.select(Axis(0), train),
                    &x.select(Axis(0), test),
                    &alphas,
                );
                for (slot, score) in fold_scores.iter_mut().zip(scores) {
                    slot.push(score);
                }
            }
            path.extend(
                alphas
                    .iter()
                    .zip(fold_scores)
                    .map(|(&alpha, scores)| PathPoint { alpha, scores }),
            );
            path.sort_by(|a, b| {
                b.alpha
                    .partial_cmp(&a.alpha)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let (best, last_finite) = select_best(&path);
            best_index = best;

            let (hi, lo) = if best_index == 0 {
                (path[0].alpha, path[1].alpha)
            } else if best_index == last_finite && best_index != path.len() - 1 {
                (path[best_index].alpha, path[best_index + 1].alpha)
            } else if best_index == path.len() - 1 {
                (path[best_index].alpha, 1e-2 * path[best_index].alpha)
            } else {
                (path[best_index - 1].alpha, path[best_index + 1].alpha)
            };
            let grid = logspace(hi, lo, self.n_alphas + 2);
            alphas = grid[1..=self.n_alphas].to_vec();

            debug!(
                refinement = refinement + 1,
                best_alpha = path[best_index].alpha,
                best_score = path[best_index].mean_score(),
                "cross-validation refinement"
            );
        }

        if path.iter().all(|p| !p.mean_score().is_finite()) {
            return Err(RegcovError::NotConverged(
                "every cross-validation fit failed".into(),
            ));
        }

        let alpha = path[best_index].alpha;
        let fit = self.estimator(alpha).fit(&emp_cov, None)?;
        info!(
            alpha,
            n_iter = fit.n_iter,
            dual_gap = fit.dual_gap,
            "selected regularization"
        );

        Ok(CovarianceEstimate {
            covariance: fit.covariance,
            precision: fit.precision,
            alpha,
            cv_path: path
                .iter()
                .map(|p| CvPoint {
                    alpha: p.alpha,
                    mean_score: p.mean_score(),
                })
                .collect(),
            n_iter: fit.n_iter,
            converged: fit.converged,
        })
    }

    /// Held-out log-likelihood along a warm-started path of decreasing alphas
    fn path_scores(&self, train: &Array2<f64>, test: &Array2<f64>, alphas: &[f64]) -> Vec<f64> {
        let emp_cov = empirical_covariance(train);
        let test_cov = empirical_covariance(test);
        let mut warm_start = emp_cov.clone();

        alphas
            .iter()
            .map(|&alpha| {
                let result = self.estimator(alpha).fit(&emp_cov, Some(&warm_start));
                match result {
                    Ok(fit) => {
                        let score = log_likelihood(&test_cov, &fit.precision);
                        warm_start = fit.covariance;
                        if score.is_finite() {
                            score
                        } else {
                            f64::NEG_INFINITY
                        }
                    }
                    Err(e) => {
                        debug!(alpha, error = %e, "path fit failed");
                        f64::NEG_INFINITY
                    }
                }
            })
            .collect()
    }
}

/// Index of the best mean score (ties go to the smaller alpha) and of the
/// last finite score
fn select_best(path: &[PathPoint]) -> (usize, usize) {
    let mut best_score = f64::NEG_INFINITY;
    let mut best_index = 0;
    let mut last_finite = 0;

    for (index, point) in path.iter().enumerate() {
        let mut score = point.mean_score();
        if score >= 0.1 / f64::EPSILON {
            score = f64::NAN;
        }
        if score.is_finite() {
            last_finite = index;
        }
        if score >= best_score {
            best_score = score;
            best_index = index;
        }
    }
    (best_index, last_finite)
}

/// `num` log-spaced values from `start` to `stop`, both included
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn logspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    if num == 1 {
        return vec![start];
    }
    let (a, b) = (start.log10(), stop.log10());
    (0..num)
        .map(|i| 10_f64.powf(a + (b - a) * i as f64 / (num - 1) as f64))
        .collect()
}

/// Contiguous K-fold splits as (train, test) index lists
///
/// The first `n % k` folds hold one extra sample.
#[must_use]
pub fn kfold(n_samples: usize, n_folds: usize) -> Vec<(Vec<usize>, Vec<usize>)> {
    let base = n_samples / n_folds;
    let extra = n_samples % n_folds;
    let mut start = 0;

    (0..n_folds)
        .map(|fold| {
            let size = base + usize::from(fold < extra);
            let test: Vec<usize> = (start..start + size).collect();
            let train: Vec<usize> = (0..start).chain(start + size..n_samples).collect();
            start += size;
            (train, test)
        })
        .collect()
}
