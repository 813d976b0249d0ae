//! Synthetic region signals drawn from a known covariance
//!
//! Used by the `simulate` subcommand to check that the estimator error
//! shrinks as the number of time points grows.

use crate::covariance::cv::GraphicalLassoCv;
use crate::covariance::linalg::cholesky;
use crate::signals::stats::frobenius_distance;
use crate::structs::{RegcovError, Result};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::info;

/// Draw `n` samples (rows) from `N(0, cov)`
///
/// # Errors
/// Returns error if `cov` is not positive definite
pub fn sample_multivariate_normal<R: Rng + ?Sized>(
    cov: &Array2<f64>,
    n: usize,
    rng: &mut R,
) -> Result<Array2<f64>> {
    let l = cholesky(cov)?;
    let z: Array2<f64> = Array2::from_shape_fn((n, cov.nrows()), |_| rng.sample(StandardNormal));
    Ok(z.dot(&l.t()))
}

/// Tridiagonal covariance with unit variance and `rho` between neighbours
///
/// # Errors
/// Returns error unless `|rho| < 0.5`, which keeps the matrix positive definite
pub fn chain_covariance(n_regions: usize, rho: f64) -> Result<Array2<f64>> {
    if rho.abs() >= 0.5 {
        return Err(RegcovError::InvalidParameter(format!(
            "neighbour correlation must satisfy |rho| < 0.5, got {rho}"
        )));
    }
    Ok(Array2::from_shape_fn((n_regions, n_regions), |(i, j)| {
        if i == j {
            1.0
        } else if i.abs_diff(j) == 1 {
            rho
        } else {
            0.0
        }
    }))
}

/// Frobenius error of the estimated covariance for each sample size
///
/// Every size gets its own draw from a generator seeded with `seed`.
///
/// # Errors
/// Returns error if sampling or any fit fails
pub fn convergence_study(
    true_cov: &Array2<f64>,
    sizes: &[usize],
    seed: u64,
    estimator: &GraphicalLassoCv,
) -> Result<Vec<(usize, f64)>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut results = Vec::with_capacity(sizes.len());

    for &n in sizes {
        let x = sample_multivariate_normal(true_cov, n, &mut rng)?;
        let estimate = estimator.fit(&x)?;
        let error = frobenius_distance(&estimate.covariance, true_cov);
        info!(samples = n, alpha = estimate.alpha, error, "simulated fit");
        results.push((n, error));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::empirical::empirical_covariance;

    #[test]
    fn test_samples_match_covariance() {
        let cov = chain_covariance(3, 0.4).expect("cov");
        let mut rng = StdRng::seed_from_u64(1);
        let x = sample_multivariate_normal(&cov, 20_000, &mut rng).expect("sample");
        let emp = empirical_covariance(&x);
        assert!(frobenius_distance(&emp, &cov) < 0.05);
    }

    #[test]
    fn test_chain_covariance_rejects_large_rho() {
        assert!(matches!(
            chain_covariance(4, 0.6),
            Err(RegcovError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_four_region_error_decreases_with_samples() {
        let cov = chain_covariance(4, 0.4).expect("cov");
        let sizes = [50, 200, 1000];
        let estimator = GraphicalLassoCv::default();

        let mut mean_errors = [0.0_f64; 3];
        let seeds = [3_u64, 11, 29, 47];
        for &seed in &seeds {
            let errors = convergence_study(&cov, &sizes, seed, &estimator).expect("study");
            for (slot, (_, e)) in mean_errors.iter_mut().zip(errors) {
                *slot += e / seeds.len() as f64;
            }
        }

        assert!(mean_errors[0] > mean_errors[1]);
        assert!(mean_errors[1] > mean_errors[2]);
    }
}
