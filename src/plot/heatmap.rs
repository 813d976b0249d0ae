//! Covariance and precision heat-maps rendered to SVG

use super::colormap::DivergingColormap;
use crate::structs::{RegcovError, Result};
use ndarray::Array2;
use plotters::prelude::*;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const HEATMAP_WIDTH: u32 = 640;
const COLORBAR_WIDTH: u32 = 120;
const FIGURE_HEIGHT: u32 = 640;
const COLORBAR_STEPS: usize = 200;

/// A matrix with the colour range it is displayed on
#[derive(Debug, Clone)]
pub struct MatrixDisplay {
    pub values: Array2<f64>,
    pub vmin: f64,
    pub vmax: f64,
}

/// Copy of `matrix` with a zeroed diagonal and a symmetric colour range
/// `±max(|min|, |max|)` over the remaining entries
#[must_use]
pub fn prepare_precision_display(matrix: &Array2<f64>) -> MatrixDisplay {
    let mut values = matrix.clone();
    values.diag_mut().fill(0.0);
    let span = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    MatrixDisplay {
        values,
        vmin: -span,
        vmax: span,
    }
}

/// Render the covariance (range [-1, 1]) and the displayed precision
///
/// `neg_precision` is the negated precision matrix; its diagonal is zeroed
/// on a copy before display. Writes `covariance.svg` and `precision.svg`
/// under `out_dir` and returns their paths.
///
/// # Errors
/// Returns error if the matrices are empty, not square, of different size,
/// or cannot be rendered.
pub fn plot_matrices(
    covariance: &Array2<f64>,
    neg_precision: &Array2<f64>,
    title: &str,
    subject: usize,
    colormap: &DivergingColormap,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let n = covariance.nrows();
    if n == 0 || covariance.ncols() != n || neg_precision.dim() != (n, n) {
        return Err(RegcovError::ShapeMismatch(format!(
            "expected two equal non-empty square matrices, got {:?} and {:?}",
            covariance.dim(),
            neg_precision.dim()
        )));
    }
    fs::create_dir_all(out_dir)?;

    let title = format!("{subject} {title}");
    let figures = [
        (
            "covariance.svg",
            format!("{title} / covariance"),
            MatrixDisplay {
                values: covariance.clone(),
                vmin: -1.0,
                vmax: 1.0,
            },
        ),
        (
            "precision.svg",
            format!("{title} / precision"),
            prepare_precision_display(neg_precision),
        ),
    ];

    let mut paths = Vec::with_capacity(figures.len());
    for (file_name, caption, display) in &figures {
        let path = out_dir.join(file_name);
        render_matrix(&path, display, caption, colormap)
            .map_err(|e| RegcovError::Plot(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), "wrote figure");
        paths.push(path);
    }
    Ok(paths)
}

#[allow(clippy::cast_precision_loss)]
fn render_matrix(
    path: &Path,
    display: &MatrixDisplay,
    caption: &str,
    colormap: &DivergingColormap,
) -> std::result::Result<(), Box<dyn Error>> {
    let n = display.values.nrows() as f64;
    let (vmin, vmax) = (display.vmin, display.vmax);

    let root =
        SVGBackend::new(path, (HEATMAP_WIDTH + COLORBAR_WIDTH, FIGURE_HEIGHT)).into_drawing_area();
    root.fill(&WHITE)?;
    let (heat_area, colorbar_area) = root.split_horizontally(HEATMAP_WIDTH);

    let mut chart = ChartBuilder::on(&heat_area)
        .caption(caption, ("sans-serif", 18))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(0.0..n, 0.0..n)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("region")
        .y_desc("region")
        .draw()?;

    // Row 0 at the top, as an image is displayed
    chart.draw_series(display.values.indexed_iter().map(|((i, j), &v)| {
        let y = n - i as f64 - 1.0;
        let x = j as f64;
        Rectangle::new(
            [(x, y), (x + 1.0, y + 1.0)],
            colormap.color_at(v, vmin, vmax).filled(),
        )
    }))?;

    let mid = n / 2.0;
    chart.draw_series(std::iter::once(PathElement::new(
        vec![(0.0, mid), (n, mid)],
        BLACK,
    )))?;
    chart.draw_series(std::iter::once(PathElement::new(
        vec![(mid, 0.0), (mid, n)],
        BLACK,
    )))?;

    let (bar_min, bar_max) = if vmax > vmin {
        (vmin, vmax)
    } else {
        (vmin - 1.0, vmax + 1.0)
    };
    let mut bar_chart = ChartBuilder::on(&colorbar_area)
        .margin_top(40)
        .margin_bottom(40)
        .margin_left(10)
        .margin_right(10)
        .x_label_area_size(0)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..1.0, bar_min..bar_max)?;
    bar_chart
        .configure_mesh()
        .x_labels(0)
        .disable_x_mesh()
        .disable_y_mesh()
        .draw()?;

    let step = (bar_max - bar_min) / COLORBAR_STEPS as f64;
    bar_chart.draw_series((0..COLORBAR_STEPS).map(|i| {
        let y0 = bar_min + step * i as f64;
        let y1 = y0 + step;
        Rectangle::new(
            [(0.0, y0), (1.0, y1)],
            colormap.color_at(0.5 * (y0 + y1), vmin, vmax).filled(),
        )
    }))?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    #[test]
    fn test_precision_display_zeroes_diagonal() {
        let neg_prec = array![[-3.0, 0.4, -0.1], [0.4, -2.0, 0.7], [-0.1, 0.7, -5.0]];
        let display = prepare_precision_display(&neg_prec);

        for i in 0..3 {
            assert!(display.values[[i, i]].abs() < 1e-15);
        }
        assert!((display.vmax - 0.7).abs() < 1e-15);
        assert!((display.vmin + 0.7).abs() < 1e-15);
        // caller's matrix untouched
        assert!((neg_prec[[0, 0]] + 3.0).abs() < 1e-15);
    }

    #[test]
    fn test_mismatched_matrices_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let result = plot_matrices(
            &Array2::eye(3),
            &Array2::eye(2),
            "t",
            1,
            &DivergingColormap::default(),
            dir.path(),
        );
        assert!(matches!(result, Err(RegcovError::ShapeMismatch(_))));
    }

    #[test]
    fn test_writes_both_figures() {
        let dir = TempDir::new().expect("tempdir");
        let cov = array![[1.0, 0.3], [0.3, 1.0]];
        let neg_prec = array![[-1.1, 0.33], [0.33, -1.1]];

        let paths = plot_matrices(
            &cov,
            &neg_prec,
            "Graph Lasso CV (0.010)",
            1,
            &DivergingColormap::default(),
            dir.path(),
        )
        .expect("plot");

        assert_eq!(paths.len(), 2);
        let svg = fs::read_to_string(&paths[0]).expect("read");
        assert!(svg.contains("1 Graph Lasso CV (0.010) / covariance"));
        assert!(paths[1].ends_with("precision.svg"));
    }
}
