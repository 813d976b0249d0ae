//! High-variance confound extraction using linfa-reduction

use super::clean::detrend;
use super::stats::{mean_of_squares, percentile};
use crate::structs::{RegcovError, Result};
use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_reduction::Pca;
use ndarray::{concatenate, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Parameters of [`high_variance_confounds`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HighVarianceParams {
    /// Number of components to return
    pub n_confounds: usize,
    /// Share (in percent) of highest-variance voxels kept
    pub percentile: f64,
    pub detrend: bool,
}

impl Default for HighVarianceParams {
    fn default() -> Self {
        Self {
            n_confounds: 5,
            percentile: 2.0,
            detrend: true,
        }
    }
}

/// Leading temporal components of the highest-variance columns of `series`
///
/// `series` is (T, V). The result is (T, k) with unit-norm columns, where
/// `k` is `n_confounds` capped by the number of retained voxels and `T - 1`.
///
/// # Errors
/// Returns error if the retained voxels carry no signal or PCA fails.
#[allow(clippy::cast_precision_loss)]
pub fn high_variance_confounds(
    series: &Array2<f64>,
    params: &HighVarianceParams,
) -> Result<Array2<f64>> {
    let n_timepoints = series.nrows();
    if params.n_confounds == 0 || n_timepoints < 2 {
        return Ok(Array2::zeros((n_timepoints, 0)));
    }
    if !(params.percentile > 0.0 && params.percentile <= 100.0) {
        return Err(RegcovError::InvalidParameter(format!(
            "high-variance percentile must lie in (0, 100], got {}",
            params.percentile
        )));
    }

    let mut series = series.to_owned();
    if params.detrend {
        detrend(&mut series);
    }

    let variance = mean_of_squares(&series);
    let mut sorted = variance.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let threshold = percentile(&sorted, 100.0 - params.percentile);

    let mut keep: Vec<usize> = (0..variance.len())
        .filter(|&i| variance[i] > threshold)
        .collect();
    if keep.is_empty() {
        keep = (0..variance.len())
            .filter(|&i| variance[i] >= threshold && variance[i] > 0.0)
            .collect();
    }
    if keep.is_empty() {
        return Err(RegcovError::Ml(
            "no voxel with non-zero variance for high-variance confounds".into(),
        ));
    }

    let selected = series.select(Axis(1), &keep);
    let n_components = params
        .n_confounds
        .min(selected.ncols())
        .min(n_timepoints - 1);
    if n_components < params.n_confounds {
        warn!(
            requested = params.n_confounds,
            available = n_components,
            "capping number of high-variance confounds"
        );
    }
    debug!(
        voxels = keep.len(),
        threshold, n_components, "extracting high-variance confounds"
    );

    let dataset = DatasetBase::from(selected.clone());
    let pca = Pca::params(n_components)
        .fit(&dataset)
        .map_err(|e| RegcovError::Ml(format!("PCA failed: {e}")))?;

    // Scores are U * S; rescale each column to a unit singular vector
    let mut components: Array2<f64> = pca.predict(&selected);
    for mut column in components.columns_mut() {
        let norm = column.dot(&column).sqrt();
        if norm > 0.0 {
            column /= norm;
        }
    }

    Ok(components)
}

/// Stack confound matrices side by side
///
/// # Errors
/// Returns error if the matrices have differing row counts
pub fn concat_confounds(high_variance: &Array2<f64>, motion: &Array2<f64>) -> Result<Array2<f64>> {
    if high_variance.nrows() != motion.nrows() {
        return Err(RegcovError::ShapeMismatch(format!(
            "high-variance confounds have {} rows but motion confounds have {}",
            high_variance.nrows(),
            motion.nrows()
        )));
    }
    Ok(concatenate(Axis(1), &[high_variance.view(), motion.view()])?)
}
