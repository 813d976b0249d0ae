//! NIfTI volume loading
//!
//! Reads `.nii` and `.nii.gz` files (gzip is handled by the reader) into
//! `ndarray` arrays indexed (x, y, z[, t]).

use crate::structs::{FunctionalVolume, RegcovError, Result};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use ndarray::{ArrayD, Ix4};
use std::path::Path;
use tracing::debug;

/// NIfTI `xyzt_units` time-unit codes
const UNITS_TIME_MASK: u8 = 0x38;
const UNITS_MSEC: u8 = 16;
const UNITS_USEC: u8 = 24;

/// A volume of any dimensionality plus its voxel-to-world affine
pub struct RawVolume {
    pub data: ArrayD<f64>,
    pub affine: [f64; 16],
    pub header: NiftiHeader,
}

/// Read any NIfTI volume, applying the header's scaling
///
/// # Errors
/// Returns error if the file cannot be read or decoded
pub fn read_volume(path: &Path) -> Result<RawVolume> {
    let obj = ReaderOptions::new().read_file(path)?;
    let header = obj.header().clone();
    let affine = affine_from_header(&header);
    let data: ArrayD<f64> = obj.into_volume().into_ndarray::<f64>()?;

    debug!(path = %path.display(), shape = ?data.shape(), "read NIfTI volume");

    Ok(RawVolume {
        data,
        affine,
        header,
    })
}

/// Read a 4-D functional volume
///
/// # Errors
/// Returns error if the file cannot be read or is not 4-D
pub fn load_functional(path: &Path) -> Result<FunctionalVolume> {
    let raw = read_volume(path)?;
    if raw.data.ndim() != 4 {
        return Err(RegcovError::Dataset(format!(
            "{}: expected a 4-D functional volume, got {}-D",
            path.display(),
            raw.data.ndim()
        )));
    }

    let t_r = repetition_time(&raw.header);
    let data = raw.data.into_dimensionality::<Ix4>()?;

    Ok(FunctionalVolume {
        data,
        affine: raw.affine,
        t_r,
    })
}

/// Repetition time in seconds from `pixdim[4]`, if recorded
fn repetition_time(header: &NiftiHeader) -> Option<f64> {
    let raw = f64::from(header.pixdim[4]);
    if raw <= 0.0 || !raw.is_finite() {
        return None;
    }
    match header.xyzt_units & UNITS_TIME_MASK {
        UNITS_MSEC => Some(raw / 1_000.0),
        UNITS_USEC => Some(raw / 1_000_000.0),
        _ => Some(raw),
    }
}

/// Voxel-to-world transform, preferring sform, falling back to voxel scaling
#[must_use]
pub fn affine_from_header(header: &NiftiHeader) -> [f64; 16] {
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        [
            f64::from(s[0]), f64::from(s[1]), f64::from(s[2]), f64::from(s[3]),
            f64::from(t[0]), f64::from(t[1]), f64::from(t[2]), f64::from(t[3]),
            f64::from(u[0]), f64::from(u[1]), f64::from(u[2]), f64::from(u[3]),
            0.0, 0.0, 0.0, 1.0,
        ]
    } else {
        let vsx = f64::from(header.pixdim[1]);
        let vsy = f64::from(header.pixdim[2]);
        let vsz = f64::from(header.pixdim[3]);
        [
            vsx, 0.0, 0.0, 0.0,
            0.0, vsy, 0.0, 0.0,
            0.0, 0.0, vsz, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}
