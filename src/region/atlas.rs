//! Labeled-region atlas loading and left/right splitting

use crate::nifti_io::read_volume;
use crate::structs::{RegcovError, RegionAtlas, Result};
use ndarray::{Array3, ArrayD, Ix3, Ix4};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Identifies an atlas by key, e.g. `cort-maxprob-thr25-2mm`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtlasSpec {
    pub key: String,
    /// Split regions crossing the mid-sagittal plane into left and right labels
    pub symmetric_split: bool,
}

impl Default for AtlasSpec {
    fn default() -> Self {
        Self {
            key: "cort-maxprob-thr25-2mm".to_string(),
            symmetric_split: true,
        }
    }
}

/// Load `<atlas_dir>/<key>.nii[.gz]` with names from `<atlas_dir>/<key>.txt`
///
/// # Errors
/// Returns error if the image is missing or unreadable, or names and labels
/// disagree.
pub fn load_atlas(atlas_dir: &Path, spec: &AtlasSpec) -> Result<RegionAtlas> {
    let image_path = resolve_image(atlas_dir, &spec.key)?;
    let raw = read_volume(&image_path)?;
    let labels = labels_from_volume(raw.data)?;
    let max_label = labels.iter().copied().max().unwrap_or(0) as usize;

    let names_path = atlas_dir.join(format!("{}.txt", spec.key));
    let names = if names_path.exists() {
        read_region_names(&names_path)?
    } else {
        (1..=max_label).map(|k| format!("Region {k}")).collect()
    };
    if max_label > names.len() {
        return Err(RegcovError::Dataset(format!(
            "atlas '{}' uses label {max_label} but only {} region names are known",
            spec.key,
            names.len()
        )));
    }

    let atlas = RegionAtlas {
        labels,
        names,
        affine: raw.affine,
    };
    info!(
        key = %spec.key,
        regions = atlas.n_regions(),
        "loaded atlas"
    );

    if spec.symmetric_split {
        Ok(symmetric_split(&atlas))
    } else {
        Ok(atlas)
    }
}

fn resolve_image(atlas_dir: &Path, key: &str) -> Result<PathBuf> {
    ["nii.gz", "nii"]
        .iter()
        .map(|ext| atlas_dir.join(format!("{key}.{ext}")))
        .find(|p| p.exists())
        .ok_or_else(|| {
            RegcovError::Dataset(format!(
                "atlas '{key}' not found in {}",
                atlas_dir.display()
            ))
        })
}

/// Region names, one per line; a leading "Background" entry is dropped
///
/// # Errors
/// Returns error if the file cannot be read
pub fn read_region_names(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    let mut names: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToString::to_string)
        .collect();
    if names
        .first()
        .is_some_and(|n| n.eq_ignore_ascii_case("background"))
    {
        names.remove(0);
    }
    Ok(names)
}

/// Integer label image from a 3-D label volume or a 4-D stack of maps
///
/// A 4-D atlas is reduced by per-voxel arg-max; voxels where every map is
/// zero stay background.
///
/// # Errors
/// Returns error for negative or non-integer labels, or other dimensionalities.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn labels_from_volume(data: ArrayD<f64>) -> Result<Array3<u32>> {
    match data.ndim() {
        3 => {
            let data = data.into_dimensionality::<Ix3>()?;
            let mut labels = Array3::zeros(data.dim());
            for (dst, &v) in labels.iter_mut().zip(data.iter()) {
                let rounded = v.round();
                if rounded < 0.0 || (v - rounded).abs() > 1e-3 {
                    return Err(RegcovError::Dataset(format!(
                        "atlas contains invalid label value {v}"
                    )));
                }
                *dst = rounded as u32;
            }
            Ok(labels)
        }
        4 => {
            let data = data.into_dimensionality::<Ix4>()?;
            let (x, y, z, _) = data.dim();
            let mut labels = Array3::zeros((x, y, z));
            for ((i, j, k), dst) in labels.indexed_iter_mut() {
                let maps = data.slice(ndarray::s![i, j, k, ..]);
                let best = maps
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| **p > 0.0)
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
                if let Some((m, _)) = best {
                    *dst = m as u32 + 1;
                }
            }
            Ok(labels)
        }
        n => Err(RegcovError::Dataset(format!(
            "atlas must be 3-D or 4-D, got {n}-D"
        ))),
    }
}

/// Split every region lying on both sides of world x = 0
///
/// Crossing regions become "Left <name>" (x < 0) and "Right <name>" (x >= 0);
/// others keep their name. Labels stay contiguous, in original order.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn symmetric_split(atlas: &RegionAtlas) -> RegionAtlas {
    let n = atlas.n_regions();
    let mut has_left = vec![false; n + 1];
    let mut has_right = vec![false; n + 1];

    for ((i, j, k), &label) in atlas.labels.indexed_iter() {
        if label == 0 || label as usize > n {
            continue;
        }
        if atlas.world_x(i, j, k) < 0.0 {
            has_left[label as usize] = true;
        } else {
            has_right[label as usize] = true;
        }
    }

    // (left label, right label) per original label
    let mut mapping = vec![(0_u32, 0_u32); n + 1];
    let mut names = Vec::with_capacity(n);
    for (label, name) in atlas.names.iter().enumerate().map(|(i, s)| (i + 1, s)) {
        if has_left[label] && has_right[label] {
            names.push(format!("Left {name}"));
            let left = names.len() as u32;
            names.push(format!("Right {name}"));
            let right = names.len() as u32;
            mapping[label] = (left, right);
        } else {
            names.push(name.clone());
            let same = names.len() as u32;
            mapping[label] = (same, same);
        }
    }

    let mut labels = atlas.labels.clone();
    for ((i, j, k), label) in labels.indexed_iter_mut() {
        let original = *label as usize;
        if original == 0 || original > n {
            continue;
        }
        let (left, right) = mapping[original];
        *label = if atlas.world_x(i, j, k) < 0.0 { left } else { right };
    }

    debug!(
        before = n,
        after = names.len(),
        "split regions across the mid-sagittal plane"
    );

    RegionAtlas {
        labels,
        names,
        affine: atlas.affine,
    }
}

/// Unit-voxel affine with world x = 0 at the centre of the x axis
#[cfg(test)]
pub(crate) fn centred_affine(nx: usize) -> [f64; 16] {
    #[allow(clippy::cast_precision_loss)]
    let offset = -((nx as f64) - 1.0) / 2.0;
    [
        1.0, 0.0, 0.0, offset,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ]
}
