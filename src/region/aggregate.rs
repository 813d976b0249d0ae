//! Region-wise averaging of voxel time series

use super::mask::check_shape;
use crate::signals::stats::{column_mean_std, STD_EPSILON};
use crate::structs::{RegcovError, RegionAtlas, RegionSignals, Result};
use ndarray::{Array2, Array4, Axis};

/// Mean time series of every atlas region
///
/// `volume` is (x, y, z, T) with the atlas' spatial shape. The result has one
/// column per region name, in label order.
///
/// # Errors
/// Returns error on a shape mismatch or if a region has no voxels.
#[allow(clippy::cast_precision_loss)]
pub fn signals_from_labels(volume: &Array4<f64>, atlas: &RegionAtlas) -> Result<RegionSignals> {
    let (x, y, z, n_timepoints) = volume.dim();
    check_shape((x, y, z), atlas.shape())?;

    let n_regions = atlas.n_regions();
    let mut sums = Array2::<f64>::zeros((n_timepoints, n_regions));
    let mut counts = vec![0_usize; n_regions];

    for (lane, &label) in volume.lanes(Axis(3)).into_iter().zip(atlas.labels.iter()) {
        let label = label as usize;
        if label == 0 || label > n_regions {
            continue;
        }
        let mut column = sums.column_mut(label - 1);
        column += &lane;
        counts[label - 1] += 1;
    }

    for (region, &count) in counts.iter().enumerate() {
        if count == 0 {
            return Err(RegcovError::EmptyRegion(atlas.names[region].clone()));
        }
        let mut column = sums.column_mut(region);
        column /= count as f64;
    }

    Ok(RegionSignals {
        names: atlas.names.clone(),
        data: sums,
    })
}

/// Divide every region's time series by its own standard deviation
///
/// # Errors
/// Returns error if a region's series is constant
pub fn normalize_unit_variance(signals: &mut RegionSignals) -> Result<()> {
    let (_, std) = column_mean_std(&signals.data);
    if let Some(region) = std.iter().position(|&s| s < STD_EPSILON || !s.is_finite()) {
        return Err(RegcovError::DegenerateRegion(signals.names[region].clone()));
    }
    signals.data /= &std;
    Ok(())
}
