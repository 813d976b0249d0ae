//! Connectivity pipeline that chains every stage for one subject

use crate::covariance::cv::{GraphicalLassoCv, ESTIMATOR_NAME};
use crate::csv_reader::load_confounds;
use crate::dataset::Dataset;
use crate::nifti_io::load_functional;
use crate::output::{write_matrix_csv, write_summary_json, RunSummary};
use crate::plot::colormap::DivergingColormap;
use crate::plot::heatmap::plot_matrices;
use crate::region::aggregate::{normalize_unit_variance, signals_from_labels};
use crate::region::atlas::{load_atlas, AtlasSpec};
use crate::region::mask::{apply_mask, check_same_grid, regions_to_mask, unmask};
use crate::signals::clean::{clean, CleanParams};
use crate::signals::confounds::{
    concat_confounds, high_variance_confounds, HighVarianceParams,
};
use crate::structs::{CovarianceEstimate, RegcovError, RegionSignals, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Configuration for the connectivity pipeline
///
/// Every field has a default, so a JSON file only needs the fields it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 0-based row of the dataset index
    pub subject: usize,
    pub atlas: String,
    pub symmetric_split: bool,
    /// Repetition time in seconds; `None` reads it from the volume header
    pub t_r: Option<f64>,
    pub high_pass: Option<f64>,
    pub low_pass: Option<f64>,
    pub detrend: bool,
    pub standardize: bool,
    pub n_hv_confounds: usize,
    pub hv_percentile: f64,
    pub n_alphas: usize,
    pub n_refinements: usize,
    pub n_folds: usize,
    pub tol: f64,
    pub max_iter: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let atlas = AtlasSpec::default();
        let clean = CleanParams::default();
        let hv = HighVarianceParams::default();
        let cv = GraphicalLassoCv::default();
        Self {
            subject: 1,
            atlas: atlas.key,
            symmetric_split: atlas.symmetric_split,
            t_r: Some(clean.t_r),
            high_pass: clean.high_pass,
            low_pass: clean.low_pass,
            detrend: clean.detrend,
            standardize: clean.standardize,
            n_hv_confounds: hv.n_confounds,
            hv_percentile: hv.percentile,
            n_alphas: cv.n_alphas,
            n_refinements: cv.n_refinements,
            n_folds: cv.n_folds,
            tol: cv.tol,
            max_iter: cv.max_iter,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON configuration file
    ///
    /// # Errors
    /// Returns error if the file is missing or not valid JSON
    pub fn from_json_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(RegcovError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    #[must_use]
    pub fn atlas_spec(&self) -> AtlasSpec {
        AtlasSpec {
            key: self.atlas.clone(),
            symmetric_split: self.symmetric_split,
        }
    }

    #[must_use]
    pub fn hv_params(&self) -> HighVarianceParams {
        HighVarianceParams {
            n_confounds: self.n_hv_confounds,
            percentile: self.hv_percentile,
            detrend: true,
        }
    }

    #[must_use]
    pub fn estimator(&self) -> GraphicalLassoCv {
        GraphicalLassoCv {
            n_alphas: self.n_alphas,
            n_refinements: self.n_refinements,
            n_folds: self.n_folds,
            max_iter: self.max_iter,
            tol: self.tol,
            ..GraphicalLassoCv::default()
        }
    }

    fn clean_params(&self, header_t_r: Option<f64>) -> Result<CleanParams> {
        let t_r = match (self.t_r, header_t_r) {
            (Some(t_r), Some(header)) => {
                if (t_r - header).abs() > 1e-6 {
                    warn!(configured = t_r, header, "repetition time differs from header");
                }
                t_r
            }
            (Some(t_r), None) => t_r,
            (None, Some(header)) => header,
            (None, None) => {
                return Err(RegcovError::Config(
                    "no repetition time configured and none in the volume header".into(),
                ))
            }
        };
        Ok(CleanParams {
            detrend: self.detrend,
            standardize: self.standardize,
            t_r,
            high_pass: self.high_pass,
            low_pass: self.low_pass,
        })
    }
}

/// Everything a run computes for one subject
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub subject: usize,
    pub n_confounds: usize,
    pub signals: RegionSignals,
    pub estimate: CovarianceEstimate,
}

/// Run every stage from raw volume to covariance estimate
///
/// # Errors
/// Returns error from the first stage that fails
pub fn run_pipeline(
    data_dir: &Path,
    atlas_dir: &Path,
    config: &PipelineConfig,
) -> Result<RunOutcome> {
    let dataset = Dataset::open(data_dir)?;
    let files = dataset.subject(config.subject)?;
    debug!(subjects = dataset.n_subjects(), func = %files.func.display(), "dataset index");

    info!("Loading raw data ({}) and masking", config.subject);
    let atlas = load_atlas(atlas_dir, &config.atlas_spec())?;
    let mask = regions_to_mask(&atlas);
    debug!(regions = atlas.n_regions(), voxels = mask.n_voxels(), "atlas mask");

    info!("Computing confounds");
    // Every voxel of the volume, not only the atlas mask
    let volume = load_functional(&files.func)?;
    check_same_grid(&volume, &atlas)?;
    let hv_confounds =
        high_variance_confounds(&volume.to_time_by_voxel(), &config.hv_params())?;
    let motion = load_confounds(&files.confounds)?;
    let confounds = concat_confounds(&hv_confounds, &motion)?;
    debug!(
        high_variance = hv_confounds.ncols(),
        motion = motion.ncols(),
        "confound matrix"
    );

    info!("Cleaning signals");
    let masked = apply_mask(&volume, &mask)?;
    let cleaned = clean(
        &masked,
        Some(&confounds),
        &config.clean_params(volume.t_r)?,
    )?;
    let cleaned_volume = unmask(&cleaned, &mask)?;

    info!("Computing region signals");
    let mut signals = signals_from_labels(&cleaned_volume, &atlas)?;
    normalize_unit_variance(&mut signals)?;

    info!("Computing covariance matrices");
    let estimate = config.estimator().fit(&signals.data)?;

    Ok(RunOutcome {
        subject: config.subject,
        n_confounds: confounds.ncols(),
        signals,
        estimate,
    })
}

/// Write figures, matrices and `summary.json` under `output_dir`
///
/// # Errors
/// Returns error if any file cannot be written
pub fn write_results(
    outcome: &RunOutcome,
    output_dir: &Path,
    colormap: &DivergingColormap,
) -> Result<Vec<PathBuf>> {
    let mut written = write_tables(outcome, output_dir)?;

    let estimate = &outcome.estimate;
    let neg_precision = -&estimate.precision;
    let title = format!("{ESTIMATOR_NAME} ({:.3})", estimate.alpha);
    written.extend(plot_matrices(
        &estimate.covariance,
        &neg_precision,
        &title,
        outcome.subject,
        colormap,
        output_dir,
    )?);

    Ok(written)
}

fn write_tables(outcome: &RunOutcome, output_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)?;
    let names = &outcome.signals.names;
    let estimate = &outcome.estimate;

    write_matrix_csv(output_dir, "covariance.csv", &estimate.covariance, names)?;
    write_matrix_csv(output_dir, "precision.csv", &estimate.precision, names)?;
    write_summary_json(
        output_dir,
        &RunSummary::new(
            outcome.subject,
            outcome.signals.n_timepoints(),
            outcome.n_confounds,
            names,
            estimate,
        ),
    )?;

    Ok(["covariance.csv", "precision.csv", "summary.json"]
        .iter()
        .map(|f| output_dir.join(f))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};
    use nifti::writer::WriterOptions;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::fmt::Write as _;
    use tempfile::TempDir;

    const N_TIMEPOINTS: usize = 80;

    /// 10x10x6 grid, three slabs along x on the lower five z slices
    fn write_atlas(dir: &Path) {
        let labels = Array3::<f32>::from_shape_fn((10, 10, 6), |(x, _, z)| {
            if z == 5 {
                0.0
            } else if x < 3 {
                1.0
            } else if x < 6 {
                2.0
            } else {
                3.0
            }
        });
        WriterOptions::new(dir.join("toy.nii"))
            .write_nifti(&labels)
            .expect("write atlas");
        fs::write(dir.join("toy.txt"), "Background\nFront\nMiddle\nBack\n").expect("names");
    }

    fn write_subject(dir: &Path) {
        let mut rng = StdRng::seed_from_u64(9);
        let latent: Vec<[f64; 2]> = (0..N_TIMEPOINTS)
            .map(|_| [rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)])
            .collect();

        let volume = Array4::<f32>::from_shape_fn((10, 10, 6, N_TIMEPOINTS), |(x, _, _, t)| {
            let signal = match x {
                0..=2 => latent[t][0],
                3..=5 => 0.6 * latent[t][0] + 0.4 * latent[t][1],
                _ => latent[t][1],
            };
            (100.0 + signal + 0.5 * rng.gen_range(-1.0..1.0)) as f32
        });
        fs::create_dir_all(dir.join("sub0")).expect("mkdir");
        WriterOptions::new(dir.join("sub0/func.nii"))
            .write_nifti(&volume)
            .expect("write func");

        let mut motion = String::from("tx ty\n");
        for t in 0..N_TIMEPOINTS {
            let drift = (t as f64 * 0.1).sin();
            let _ = writeln!(motion, "{drift:.4} {:.4}", rng.gen_range(-0.1..0.1));
        }
        fs::write(dir.join("sub0/motion.1D"), motion).expect("motion");
        fs::write(
            dir.join("index.tsv"),
            "func\tconfounds\nsub0/func.nii\tsub0/motion.1D\n",
        )
        .expect("index");
    }

    fn toy_config() -> PipelineConfig {
        PipelineConfig {
            subject: 0,
            atlas: "toy".into(),
            symmetric_split: false,
            n_hv_confounds: 2,
            hv_percentile: 10.0,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_config_defaults_from_partial_json() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"subject": 3, "low_pass": 0.1}"#).expect("write");

        let config = PipelineConfig::from_json_file(&path).expect("config");
        assert_eq!(config.subject, 3);
        assert_eq!(config.low_pass, Some(0.1));
        assert_eq!(config.high_pass, Some(0.01));
        assert_eq!(config.n_folds, 3);
        assert_eq!(config.atlas, "cort-maxprob-thr25-2mm");
    }

    #[test]
    fn test_missing_config_file() {
        let result = PipelineConfig::from_json_file(Path::new("/nonexistent/regcov.json"));
        assert!(matches!(result, Err(RegcovError::Config(_))));
    }

    #[test]
    fn test_repetition_time_resolution() {
        let mut config = PipelineConfig::default();
        assert!((config.clean_params(Some(2.0)).expect("t_r").t_r - 2.5).abs() < 1e-12);

        config.t_r = None;
        assert!((config.clean_params(Some(2.0)).expect("t_r").t_r - 2.0).abs() < 1e-12);
        assert!(matches!(
            config.clean_params(None),
            Err(RegcovError::Config(_))
        ));
    }

    #[test]
    fn test_pipeline_end_to_end() {
        let data = TempDir::new().expect("data dir");
        let atlas = TempDir::new().expect("atlas dir");
        let out = TempDir::new().expect("output dir");
        write_subject(data.path());
        write_atlas(atlas.path());

        let outcome = run_pipeline(data.path(), atlas.path(), &toy_config()).expect("pipeline");

        assert_eq!(outcome.signals.names, vec!["Front", "Middle", "Back"]);
        assert_eq!(outcome.signals.data.dim(), (N_TIMEPOINTS, 3));
        assert_eq!(outcome.n_confounds, 4);

        let cov = &outcome.estimate.covariance;
        for i in 0..3 {
            assert!(cov[[i, i]] >= 0.0);
            for j in 0..3 {
                assert!((cov[[i, j]] - cov[[j, i]]).abs() < 1e-10);
            }
        }

        let written = write_results(&outcome, out.path(), &DivergingColormap::default())
            .expect("results");
        assert_eq!(written.len(), 5);
        assert!(written.iter().all(|p| p.is_file()));
        let header = fs::read_to_string(out.path().join("covariance.csv")).expect("read");
        assert!(header.starts_with("Front,Middle,Back"));

        let title = format!("0 Graph Lasso CV ({:.3})", outcome.estimate.alpha);
        for (file, kind) in [("covariance.svg", "covariance"), ("precision.svg", "precision")] {
            let svg = fs::read_to_string(out.path().join(file)).expect("read svg");
            assert!(svg.contains(&format!("{title} / {kind}")), "{file} lacks title");
        }
    }
}
