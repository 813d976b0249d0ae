#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::uninlined_format_args)]

mod covariance;
mod csv_reader;
mod dataset;
mod nifti_io;
mod output;
mod pipeline;
mod plot;
mod region;
mod signals;
mod simulate;
mod structs;

use clap::{Parser, Subcommand};
use covariance::cv::GraphicalLassoCv;
use pipeline::PipelineConfig;
use plot::colormap::DivergingColormap;
use std::path::{Path, PathBuf};
use structs::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// regcov - region-wise functional connectivity from fMRI volumes
#[derive(Parser, Debug)]
#[command(name = "regcov")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Clean one subject's signals and estimate region covariance and precision
    Run {
        /// Dataset directory holding `index.tsv`
        #[arg(short, long)]
        data_dir: PathBuf,

        /// Subject row in the dataset index (0-based)
        #[arg(short, long)]
        subject: Option<usize>,

        /// Atlas key, resolved as `<atlas-dir>/<key>.nii[.gz]`
        #[arg(short, long)]
        atlas: Option<String>,

        /// Directory holding atlas images and name lists
        #[arg(long, default_value = "./atlases")]
        atlas_dir: PathBuf,

        /// Split regions crossing the mid-sagittal plane into left and right
        #[arg(long, overrides_with = "no_symmetric_split")]
        symmetric_split: bool,

        /// Keep regions whole, overriding the configuration file
        #[arg(long, overrides_with = "symmetric_split")]
        no_symmetric_split: bool,

        /// Output directory for figures, matrices and summary
        #[arg(short, long, default_value = "./regcov_output")]
        output_dir: PathBuf,

        /// JSON pipeline configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Check estimator error against a known covariance as samples grow
    Simulate {
        /// Number of regions
        #[arg(short, long, default_value = "10")]
        regions: usize,

        /// Sample sizes to evaluate
        #[arg(long, value_delimiter = ',', default_value = "50,200,1000")]
        sizes: Vec<usize>,

        /// Correlation between neighbouring regions
        #[arg(long, default_value = "0.3")]
        rho: f64,

        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Commands::Run {
            data_dir,
            subject,
            atlas,
            atlas_dir,
            symmetric_split,
            no_symmetric_split,
            output_dir,
            config,
        }) => {
            let mut pipeline_config = match config {
                Some(path) => PipelineConfig::from_json_file(&path)?,
                None => PipelineConfig::default(),
            };
            if let Some(subject) = subject {
                pipeline_config.subject = subject;
            }
            if let Some(atlas) = atlas {
                pipeline_config.atlas = atlas;
            }
            if let Some(split) = split_override(symmetric_split, no_symmetric_split) {
                pipeline_config.symmetric_split = split;
            }
            run_connectivity(&data_dir, &atlas_dir, &output_dir, &pipeline_config)
        }

        Some(Commands::Simulate {
            regions,
            sizes,
            rho,
            seed,
        }) => run_simulate(regions, &sizes, rho, seed),

        None => {
            eprintln!("No subcommand provided. Use 'regcov run' or 'regcov simulate'.");
            eprintln!("Run 'regcov --help' for usage information.");
            std::process::exit(1);
        }
    }
}

/// Split setting requested on the command line, if any
const fn split_override(split: bool, no_split: bool) -> Option<bool> {
    match (split, no_split) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

/// Run the pipeline for one subject and write every output
fn run_connectivity(
    data_dir: &Path,
    atlas_dir: &Path,
    output_dir: &Path,
    config: &PipelineConfig,
) -> Result<()> {
    let outcome = pipeline::run_pipeline(data_dir, atlas_dir, config)?;
    info!(
        regions = outcome.signals.n_regions(),
        alpha = outcome.estimate.alpha,
        converged = outcome.estimate.converged,
        "estimated connectivity"
    );

    let written = pipeline::write_results(&outcome, output_dir, &DivergingColormap::default())?;
    eprintln!("Output written to {}", output_dir.display());
    for path in &written {
        if let Some(name) = path.file_name() {
            eprintln!("  - {}", name.to_string_lossy());
        }
    }
    Ok(())
}

fn run_simulate(regions: usize, sizes: &[usize], rho: f64, seed: u64) -> Result<()> {
    let true_cov = simulate::chain_covariance(regions, rho)?;
    let results =
        simulate::convergence_study(&true_cov, sizes, seed, &GraphicalLassoCv::default())?;

    println!("samples\tfrobenius_error");
    for (n, error) in results {
        println!("{n}\t{error:.6}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_split(extra: &[&str]) -> Option<bool> {
        let mut argv = vec!["regcov", "run", "--data-dir", "data"];
        argv.extend_from_slice(extra);
        match Args::try_parse_from(argv).expect("parse").command {
            Some(Commands::Run {
                symmetric_split,
                no_symmetric_split,
                ..
            }) => split_override(symmetric_split, no_symmetric_split),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_symmetric_split_is_a_bare_flag() {
        assert_eq!(run_split(&["--symmetric-split"]), Some(true));
        assert_eq!(run_split(&["--no-symmetric-split"]), Some(false));
        assert_eq!(run_split(&[]), None);
    }

    #[test]
    fn test_last_split_flag_wins() {
        assert_eq!(
            run_split(&["--symmetric-split", "--no-symmetric-split"]),
            Some(false)
        );
        assert_eq!(
            run_split(&["--no-symmetric-split", "--symmetric-split"]),
            Some(true)
        );
    }

    #[test]
    fn test_simulate_sizes_are_comma_separated() {
        let args = Args::try_parse_from(["regcov", "simulate", "--sizes", "50,200,1000"])
            .expect("parse");
        match args.command {
            Some(Commands::Simulate { sizes, regions, .. }) => {
                assert_eq!(sizes, vec![50, 200, 1000]);
                assert_eq!(regions, 10);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
