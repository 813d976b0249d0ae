use crate::structs::{BrainMask, FunctionalVolume, RegcovError, RegionAtlas, Result};
use ndarray::{Array2, Array4, Axis};

/// Boolean mask of every labeled voxel
#[must_use]
pub fn regions_to_mask(atlas: &RegionAtlas) -> BrainMask {
    BrainMask {
        voxels: atlas.labels.mapv(|label| label > 0),
    }
}

/// Time series of the voxels inside the mask: shape (T, n_mask_voxels)
///
/// Voxels are ordered as in a C-order scan of the spatial axes.
///
/// # Errors
/// Returns error if the mask and volume spatial shapes differ
pub fn apply_mask(volume: &FunctionalVolume, mask: &BrainMask) -> Result<Array2<f64>> {
    check_shape(volume.spatial_shape(), mask.shape())?;

    let mut out = Array2::zeros((volume.n_timepoints(), mask.n_voxels()));
    let lanes = volume.data.lanes(Axis(3)).into_iter();
    let mut column = 0;
    for (lane, &inside) in lanes.zip(mask.voxels.iter()) {
        if inside {
            out.column_mut(column).assign(&lane);
            column += 1;
        }
    }
    Ok(out)
}

/// Inverse of [`apply_mask`]: voxels outside the mask are zero
///
/// # Errors
/// Returns error if the signal column count differs from the mask size
pub fn unmask(signals: &Array2<f64>, mask: &BrainMask) -> Result<Array4<f64>> {
    if signals.ncols() != mask.n_voxels() {
        return Err(RegcovError::ShapeMismatch(format!(
            "{} signal columns for a mask of {} voxels",
            signals.ncols(),
            mask.n_voxels()
        )));
    }

    let (x, y, z) = mask.shape();
    let mut volume = Array4::zeros((x, y, z, signals.nrows()));
    let mut column = 0;
    for (mut lane, &inside) in volume.lanes_mut(Axis(3)).into_iter().zip(mask.voxels.iter()) {
        if inside {
            lane.assign(&signals.column(column));
            column += 1;
        }
    }
    Ok(volume)
}

/// Largest difference between affine entries of grids treated as the same
const AFFINE_TOLERANCE: f64 = 1e-3;

/// Check that the atlas lies on the functional volume's voxel grid
///
/// # Errors
/// Returns error if the spatial shapes or the voxel-to-world affines differ
pub fn check_same_grid(volume: &FunctionalVolume, atlas: &RegionAtlas) -> Result<()> {
    check_shape(volume.spatial_shape(), atlas.shape())?;

    let max_diff = volume
        .affine
        .iter()
        .zip(atlas.affine.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max);
    if max_diff > AFFINE_TOLERANCE {
        return Err(RegcovError::ShapeMismatch(format!(
            "atlas affine differs from the functional affine by up to {max_diff}"
        )));
    }
    Ok(())
}

pub(crate) fn check_shape(
    volume: (usize, usize, usize),
    other: (usize, usize, usize),
) -> Result<()> {
    if volume == other {
        Ok(())
    } else {
        Err(RegcovError::ShapeMismatch(format!(
            "volume spatial shape {volume:?} differs from mask/atlas shape {other:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn volume() -> FunctionalVolume {
        FunctionalVolume {
            data: Array4::from_shape_fn((2, 2, 1, 3), |(x, y, _, t)| {
                (10 * x + y) as f64 + 0.1 * t as f64
            }),
            affine: [0.0; 16],
            t_r: Some(2.5),
        }
    }

    #[test]
    fn test_regions_to_mask() {
        let atlas = RegionAtlas {
            labels: Array3::from_shape_vec((2, 2, 1), vec![0, 1, 2, 0]).expect("shape"),
            names: vec!["a".into(), "b".into()],
            affine: [0.0; 16],
        };
        let mask = regions_to_mask(&atlas);
        assert_eq!(mask.n_voxels(), 2);
        assert!(mask.voxels[[0, 1, 0]]);
        assert!(!mask.voxels[[1, 1, 0]]);
    }

    #[test]
    fn test_apply_then_unmask() {
        let mask = BrainMask {
            voxels: Array3::from_shape_vec((2, 2, 1), vec![false, true, true, false])
                .expect("shape"),
        };
        let vol = volume();
        let masked = apply_mask(&vol, &mask).expect("mask");
        assert_eq!(masked.dim(), (3, 2));
        assert!((masked[[2, 0]] - 1.2).abs() < 1e-12);
        assert!((masked[[0, 1]] - 10.0).abs() < 1e-12);

        let restored = unmask(&masked, &mask).expect("unmask");
        assert_eq!(restored.dim(), (2, 2, 1, 3));
        assert!((restored[[1, 0, 0, 1]] - 10.1).abs() < 1e-12);
        assert!(restored[[0, 0, 0, 1]].abs() < 1e-12);
    }

    fn atlas_on(affine: [f64; 16]) -> RegionAtlas {
        RegionAtlas {
            labels: Array3::from_elem((2, 2, 1), 1),
            names: vec!["a".into()],
            affine,
        }
    }

    #[test]
    fn test_same_grid_accepts_matching_affine() {
        let mut vol = volume();
        vol.affine = [
            2.0, 0.0, 0.0, -90.0,
            0.0, 2.0, 0.0, -126.0,
            0.0, 0.0, 2.0, -72.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        let mut affine = vol.affine;
        affine[3] += 1e-5;
        assert!(check_same_grid(&vol, &atlas_on(affine)).is_ok());
    }

    #[test]
    fn test_same_grid_rejects_other_voxel_size() {
        let mut vol = volume();
        vol.affine[0] = 3.0;
        vol.affine[5] = 3.0;
        vol.affine[10] = 3.0;

        let mut affine = vol.affine;
        affine[0] = 2.0;
        assert!(matches!(
            check_same_grid(&vol, &atlas_on(affine)),
            Err(RegcovError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_shape_mismatch() {
        let mask = BrainMask {
            voxels: Array3::from_elem((3, 2, 1), true),
        };
        assert!(matches!(
            apply_mask(&volume(), &mask),
            Err(RegcovError::ShapeMismatch(_))
        ));
        assert!(unmask(&Array2::zeros((3, 2)), &mask).is_err());
    }
}
