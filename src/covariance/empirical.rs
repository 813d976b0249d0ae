use super::linalg::log_det_spd;
use ndarray::{Array2, Axis};

/// Maximum-likelihood covariance of (T, R) observations (centred, divided by T)
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn empirical_covariance(x: &Array2<f64>) -> Array2<f64> {
    let n = x.nrows();
    if n == 0 {
        return Array2::zeros((x.ncols(), x.ncols()));
    }
    let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| ndarray::Array1::zeros(x.ncols()));
    let centred = x - &mean;
    centred.t().dot(&centred) / n as f64
}

/// Gaussian log-likelihood of an empirical covariance under a precision matrix
///
/// Normalized per sample: `(-tr(S Θ) + log det Θ - R ln 2π) / 2`.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn log_likelihood(emp_cov: &Array2<f64>, precision: &Array2<f64>) -> f64 {
    let p = precision.nrows() as f64;
    let trace_term: f64 = emp_cov.iter().zip(precision.iter()).map(|(s, t)| s * t).sum();
    (-trace_term + log_det_spd(precision) - p * (2.0 * std::f64::consts::PI).ln()) / 2.0
}

/// Smallest alpha for which the graphical lasso precision is diagonal
#[must_use]
pub fn alpha_max(emp_cov: &Array2<f64>) -> f64 {
    emp_cov
        .indexed_iter()
        .filter(|((i, j), _)| i != j)
        .map(|(_, v)| v.abs())
        .fold(0.0, f64::max)
}
