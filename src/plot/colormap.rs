//! Diverging blue-white-red colormap passed by value to the plotting calls

use plotters::style::RGBColor;

/// Linear blue → white → red colormap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DivergingColormap {
    pub low: (f64, f64, f64),
    pub mid: (f64, f64, f64),
    pub high: (f64, f64, f64),
}

impl Default for DivergingColormap {
    fn default() -> Self {
        Self {
            low: (0.0, 0.0, 1.0),
            mid: (1.0, 1.0, 1.0),
            high: (1.0, 0.0, 0.0),
        }
    }
}

impl DivergingColormap {
    /// RGB triple in [0, 1] at position `t` in [0, 1] (clamped)
    #[must_use]
    pub fn rgb(&self, t: f64) -> (f64, f64, f64) {
        let t = if t.is_nan() { 0.5 } else { t.clamp(0.0, 1.0) };
        if t < 0.5 {
            lerp(self.low, self.mid, 2.0 * t)
        } else {
            lerp(self.mid, self.high, 2.0 * t - 1.0)
        }
    }

    /// Colour of `value` on the range `[vmin, vmax]`
    #[must_use]
    pub fn color_at(&self, value: f64, vmin: f64, vmax: f64) -> RGBColor {
        let t = if vmax > vmin {
            (value - vmin) / (vmax - vmin)
        } else {
            0.5
        };
        let (r, g, b) = self.rgb(t);
        RGBColor(to_byte(r), to_byte(g), to_byte(b))
    }
}

fn lerp(a: (f64, f64, f64), b: (f64, f64, f64), t: f64) -> (f64, f64, f64) {
    (
        a.0 + (b.0 - a.0) * t,
        a.1 + (b.1 - a.1) * t,
        a.2 + (b.2 - a.2) * t,
    )
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_byte(c: f64) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(c: RGBColor) -> (u8, u8, u8) {
        (c.0, c.1, c.2)
    }

    #[test]
    fn test_endpoints_and_centre() {
        let cmap = DivergingColormap::default();
        assert_eq!(bytes(cmap.color_at(-1.0, -1.0, 1.0)), (0, 0, 255));
        assert_eq!(bytes(cmap.color_at(0.0, -1.0, 1.0)), (255, 255, 255));
        assert_eq!(bytes(cmap.color_at(1.0, -1.0, 1.0)), (255, 0, 0));
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        let cmap = DivergingColormap::default();
        assert_eq!(bytes(cmap.color_at(5.0, -1.0, 1.0)), (255, 0, 0));
        assert_eq!(bytes(cmap.color_at(-5.0, -1.0, 1.0)), (0, 0, 255));
    }

    #[test]
    fn test_degenerate_range_is_white() {
        let cmap = DivergingColormap::default();
        assert_eq!(bytes(cmap.color_at(0.3, 0.0, 0.0)), (255, 255, 255));
    }

    #[test]
    fn test_quarter_point() {
        let (r, g, b) = DivergingColormap::default().rgb(0.25);
        assert!((r - 0.5).abs() < 1e-12);
        assert!((g - 0.5).abs() < 1e-12);
        assert!((b - 1.0).abs() < 1e-12);
    }
}
