//! Consolidated public types for the regcov crate
//!
//! This module contains the error type and the in-memory entities passed
//! between pipeline stages.

use ndarray::{Array2, Array3, Array4};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum RegcovError {
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Region '{0}' contains no voxels")]
    EmptyRegion(String),

    #[error("Region '{0}' has zero variance after averaging")]
    DegenerateRegion(String),

    #[error("Not enough samples: {samples} time points for {features} regions (need more time points than regions)")]
    InsufficientSamples { samples: usize, features: usize },

    #[error("Matrix is not positive definite: {0}")]
    NotPositiveDefinite(String),

    #[error("Estimator did not converge: {0}")]
    NotConverged(String),

    #[error("ML error: {0}")]
    Ml(String),

    #[error("Plot error: {0}")]
    Plot(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RegcovError>;

// ============================================================================
// Imaging Types
// ============================================================================

/// 4-D functional volume indexed (x, y, z, t)
#[derive(Debug, Clone)]
pub struct FunctionalVolume {
    pub data: Array4<f64>,
    /// Voxel-to-world transform (4x4, row-major)
    pub affine: [f64; 16],
    /// Repetition time in seconds, when the header records one
    pub t_r: Option<f64>,
}

impl FunctionalVolume {
    /// Number of time points
    #[must_use]
    pub fn n_timepoints(&self) -> usize {
        self.data.dim().3
    }

    /// Spatial shape (x, y, z)
    #[must_use]
    pub fn spatial_shape(&self) -> (usize, usize, usize) {
        let (x, y, z, _) = self.data.dim();
        (x, y, z)
    }

    /// Every voxel as a column: shape (T, x*y*z), voxels in C order
    #[must_use]
    pub fn to_time_by_voxel(&self) -> Array2<f64> {
        let (x, y, z, t) = self.data.dim();
        let n_voxels = x * y * z;
        let mut out = Array2::zeros((t, n_voxels));
        for (voxel, lane) in self
            .data
            .lanes(ndarray::Axis(3))
            .into_iter()
            .enumerate()
        {
            out.column_mut(voxel).assign(&lane);
        }
        out
    }
}

/// Boolean brain mask with the spatial shape of the functional volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrainMask {
    pub voxels: Array3<bool>,
}

impl BrainMask {
    /// Number of voxels inside the mask
    #[must_use]
    pub fn n_voxels(&self) -> usize {
        self.voxels.iter().filter(|&&v| v).count()
    }

    #[must_use]
    pub fn shape(&self) -> (usize, usize, usize) {
        self.voxels.dim()
    }
}

/// Labeled partition of the brain into named regions
///
/// Label `0` is background; label `k` refers to `names[k - 1]`.
#[derive(Debug, Clone)]
pub struct RegionAtlas {
    pub labels: Array3<u32>,
    pub names: Vec<String>,
    pub affine: [f64; 16],
}

impl RegionAtlas {
    /// Number of named regions
    #[must_use]
    pub fn n_regions(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn shape(&self) -> (usize, usize, usize) {
        self.labels.dim()
    }

    /// World x coordinate of a voxel
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn world_x(&self, i: usize, j: usize, k: usize) -> f64 {
        let a = &self.affine;
        a[0] * i as f64 + a[1] * j as f64 + a[2] * k as f64 + a[3]
    }
}

// ============================================================================
// Signal Types
// ============================================================================

/// One time series per region: shape (T, R)
#[derive(Debug, Clone)]
pub struct RegionSignals {
    pub names: Vec<String>,
    pub data: Array2<f64>,
}

impl RegionSignals {
    #[must_use]
    pub fn n_timepoints(&self) -> usize {
        self.data.nrows()
    }

    #[must_use]
    pub fn n_regions(&self) -> usize {
        self.data.ncols()
    }
}

// ============================================================================
// Covariance Types
// ============================================================================

/// One grid point of the cross-validation path
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CvPoint {
    pub alpha: f64,
    /// Mean held-out log-likelihood over folds (`-inf` when every fold failed)
    pub mean_score: f64,
}

/// Result of a graphical lasso fit with cross-validated regularization
#[derive(Debug, Clone)]
pub struct CovarianceEstimate {
    pub covariance: Array2<f64>,
    pub precision: Array2<f64>,
    /// Selected regularization coefficient
    pub alpha: f64,
    /// Every alpha tried, sorted by decreasing alpha
    pub cv_path: Vec<CvPoint>,
    pub n_iter: usize,
    pub converged: bool,
}
