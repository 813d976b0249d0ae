//! Voxel signal cleaning
//!
//! Order is fixed: detrend, confound regression, temporal filtering,
//! standardization.

use super::filter::TemporalFilter;
use super::stats::{column_mean_std, STD_EPSILON};
use crate::structs::{RegcovError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Relative norm under which a confound column adds nothing to the basis
const RANK_TOLERANCE: f64 = 1e-10;

/// Parameters of [`clean`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CleanParams {
    pub detrend: bool,
    pub standardize: bool,
    /// Repetition time in seconds
    pub t_r: f64,
    /// High-pass cutoff in Hz
    pub high_pass: Option<f64>,
    /// Low-pass cutoff in Hz
    pub low_pass: Option<f64>,
}

impl Default for CleanParams {
    fn default() -> Self {
        Self {
            detrend: true,
            standardize: true,
            t_r: 2.5,
            high_pass: Some(0.01),
            low_pass: None,
        }
    }
}

/// Clean (T, N) signals, returning a new matrix of identical shape
///
/// # Errors
/// Returns error if the confound matrix does not have T rows or the filter
/// parameters are invalid.
pub fn clean(
    signals: &Array2<f64>,
    confounds: Option<&Array2<f64>>,
    params: &CleanParams,
) -> Result<Array2<f64>> {
    let n_timepoints = signals.nrows();
    if let Some(c) = confounds {
        if c.nrows() != n_timepoints {
            return Err(RegcovError::ShapeMismatch(format!(
                "confounds have {} rows but signals have {n_timepoints} time points",
                c.nrows()
            )));
        }
    }
    let filter = TemporalFilter::new(params.t_r, params.high_pass, params.low_pass)?;

    let mut out = signals.to_owned();

    if params.detrend {
        detrend(&mut out);
    }

    if let Some(c) = confounds {
        let mut c = c.to_owned();
        if params.detrend {
            detrend(&mut c);
        } else {
            center(&mut c);
        }
        let basis = orthonormal_basis(&c);
        debug!(
            confounds = c.ncols(),
            rank = basis.ncols(),
            "regressing out confounds"
        );
        if basis.ncols() > 0 {
            let projection = basis.dot(&basis.t().dot(&out));
            out -= &projection;
        }
    }

    filter.apply(&mut out);

    if params.standardize {
        standardize(&mut out);
    }

    Ok(out)
}

/// Remove each column's mean and least-squares linear trend
#[allow(clippy::cast_precision_loss)]
pub fn detrend(signals: &mut Array2<f64>) {
    let n = signals.nrows();
    if n == 0 {
        return;
    }
    center(signals);

    let mid = (n as f64 - 1.0) / 2.0;
    let mut regressor = Array1::from_shape_fn(n, |i| i as f64 - mid);
    let norm = regressor.dot(&regressor).sqrt();
    if norm <= STD_EPSILON {
        return;
    }
    regressor /= norm;

    let slopes = regressor.dot(&*signals);
    for (mut row, &r) in signals.axis_iter_mut(Axis(0)).zip(regressor.iter()) {
        row.scaled_add(-r, &slopes);
    }
}

/// Zero mean, unit population standard deviation per column
///
/// Constant columns end up all zeros.
pub fn standardize(signals: &mut Array2<f64>) {
    let (mean, std) = column_mean_std(signals);
    let std = std.mapv(|s| if s < STD_EPSILON { 1.0 } else { s });
    *signals -= &mean;
    *signals /= &std;
}

fn center(signals: &mut Array2<f64>) {
    if let Some(mean) = signals.mean_axis(Axis(0)) {
        *signals -= &mean;
    }
}

/// Orthonormal basis of the column space (modified Gram-Schmidt)
///
/// Columns whose residual is negligible are dropped, so the result may have
/// fewer columns than the input.
#[must_use]
pub fn orthonormal_basis(columns: &Array2<f64>) -> Array2<f64> {
    let max_norm = columns
        .columns()
        .into_iter()
        .map(|c| c.dot(&c).sqrt())
        .fold(0.0_f64, f64::max);
    if max_norm <= 0.0 {
        return Array2::zeros((columns.nrows(), 0));
    }

    let mut basis: Vec<Array1<f64>> = Vec::new();
    for column in columns.columns() {
        let norm = column.dot(&column).sqrt();
        if norm <= RANK_TOLERANCE * max_norm {
            continue;
        }
        let mut v = column.to_owned() / norm;
        for q in &basis {
            let proj = q.dot(&v);
            v.scaled_add(-proj, q);
        }
        let residual = v.dot(&v).sqrt();
        if residual > RANK_TOLERANCE.sqrt() {
            basis.push(v / residual);
        }
    }

    let mut out = Array2::zeros((columns.nrows(), basis.len()));
    for (j, q) in basis.iter().enumerate() {
        out.column_mut(j).assign(q);
    }
    out
}
