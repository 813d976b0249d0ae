//! Result file writers for a pipeline run

use crate::structs::{CovarianceEstimate, CvPoint, RegcovError, Result};
use ndarray::Array2;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Machine-readable overview of a run, written as `summary.json`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub subject: usize,
    pub n_timepoints: usize,
    pub n_confounds: usize,
    pub n_regions: usize,
    pub regions: Vec<String>,
    pub alpha: f64,
    pub cv_path: Vec<CvPoint>,
    pub n_iter: usize,
    pub converged: bool,
}

impl RunSummary {
    #[must_use]
    pub fn new(
        subject: usize,
        n_timepoints: usize,
        n_confounds: usize,
        regions: &[String],
        estimate: &CovarianceEstimate,
    ) -> Self {
        Self {
            subject,
            n_timepoints,
            n_confounds,
            n_regions: regions.len(),
            regions: regions.to_vec(),
            alpha: estimate.alpha,
            cv_path: estimate.cv_path.clone(),
            n_iter: estimate.n_iter,
            converged: estimate.converged,
        }
    }
}

/// Write a square matrix as CSV with a header row of region names
///
/// # Errors
/// Returns error if the names do not match the matrix or the file cannot be
/// written
pub fn write_matrix_csv(
    output_dir: &Path,
    file_name: &str,
    matrix: &Array2<f64>,
    names: &[String],
) -> Result<()> {
    if matrix.nrows() != names.len() || matrix.ncols() != names.len() {
        return Err(RegcovError::ShapeMismatch(format!(
            "{} names for a {:?} matrix",
            names.len(),
            matrix.dim()
        )));
    }

    let mut writer = csv::Writer::from_path(output_dir.join(file_name))?;
    writer.write_record(names)?;
    for row in matrix.rows() {
        writer.write_record(row.iter().map(|v| format!("{v:.6}")))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write `summary.json`
///
/// # Errors
/// Returns error if file cannot be written
pub fn write_summary_json(output_dir: &Path, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(output_dir.join("summary.json"), json)?;
    Ok(())
}
