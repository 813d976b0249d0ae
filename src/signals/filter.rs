//! Zero-phase Butterworth filtering of voxel time series
//!
//! Each filter is a cascade of second-order sections (plus one first-order
//! section for odd orders) designed with the pre-warped bilinear transform.
//! The whole cascade runs forward then backward over an odd-extended copy of
//! each column, padded by three times the number of denominator coefficients.

use crate::structs::{RegcovError, Result};
use ndarray::Array2;
use tracing::warn;

/// Order of the high-pass and low-pass filters
pub const BUTTERWORTH_ORDER: usize = 5;

/// Second-order IIR section, `a[0]` normalized to 1
///
/// First-order sections keep `b[2] = a[2] = 0`.
#[derive(Clone, Debug, PartialEq)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Biquad {
    /// Low-pass section with analog denominator `s^2 + damping*s + 1`
    fn lowpass(k: f64, damping: f64) -> Self {
        let k2 = k * k;
        let norm = 1.0 / (1.0 + damping * k + k2);
        Self {
            b: [k2 * norm, 2.0 * k2 * norm, k2 * norm],
            a: [1.0, 2.0 * (k2 - 1.0) * norm, (1.0 - damping * k + k2) * norm],
        }
    }

    /// High-pass section with analog denominator `s^2 + damping*s + 1`
    fn highpass(k: f64, damping: f64) -> Self {
        let k2 = k * k;
        let norm = 1.0 / (1.0 + damping * k + k2);
        Self {
            b: [norm, -2.0 * norm, norm],
            a: [1.0, 2.0 * (k2 - 1.0) * norm, (1.0 - damping * k + k2) * norm],
        }
    }

    fn lowpass_first_order(k: f64) -> Self {
        let norm = 1.0 / (1.0 + k);
        Self {
            b: [k * norm, k * norm, 0.0],
            a: [1.0, (k - 1.0) * norm, 0.0],
        }
    }

    fn highpass_first_order(k: f64) -> Self {
        let norm = 1.0 / (1.0 + k);
        Self {
            b: [norm, -norm, 0.0],
            a: [1.0, (k - 1.0) * norm, 0.0],
        }
    }

    /// Gain at DC
    #[must_use]
    pub fn dc_gain(&self) -> f64 {
        (self.b[0] + self.b[1] + self.b[2]) / (self.a[0] + self.a[1] + self.a[2])
    }

    /// Filter state reached after a long run of unit input
    fn steady_state(&self) -> [f64; 2] {
        let h = self.dc_gain();
        let z2 = self.b[2] - self.a[2] * h;
        let z1 = self.b[1] - self.a[1] * h + z2;
        [z1, z2]
    }

    /// Transposed direct form II over `x`, starting from state `zi`
    fn run(&self, x: &[f64], zi: [f64; 2]) -> Vec<f64> {
        let [b0, b1, b2] = self.b;
        let [_, a1, a2] = self.a;
        let [mut z1, mut z2] = zi;

        x.iter()
            .map(|&input| {
                let y = b0 * input + z1;
                z1 = b1 * input - a1 * y + z2;
                z2 = b2 * input - a2 * y;
                y
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Band {
    Low,
    High,
}

/// Cascade of sections forming one Butterworth response
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Butterworth {
    sections: Vec<Biquad>,
    order: usize,
}

impl Butterworth {
    /// Low-pass of the given order; `cutoff` and `sample_rate` in Hz
    #[must_use]
    pub fn lowpass(order: usize, sample_rate: f64, cutoff: f64) -> Self {
        Self::design(order, sample_rate, cutoff, Band::Low)
    }

    /// High-pass of the given order; `cutoff` and `sample_rate` in Hz
    #[must_use]
    pub fn highpass(order: usize, sample_rate: f64, cutoff: f64) -> Self {
        Self::design(order, sample_rate, cutoff, Band::High)
    }

    #[allow(clippy::cast_precision_loss)]
    fn design(order: usize, sample_rate: f64, cutoff: f64, band: Band) -> Self {
        let k = (std::f64::consts::PI * cutoff / sample_rate).tan();
        let n = order as f64;

        // Conjugate pole pairs of the analog prototype, then the real pole
        let mut sections: Vec<Biquad> = (0..order / 2)
            .map(|i| {
                let damping =
                    2.0 * (std::f64::consts::PI * (2.0 * i as f64 + 1.0) / (2.0 * n)).sin();
                match band {
                    Band::Low => Biquad::lowpass(k, damping),
                    Band::High => Biquad::highpass(k, damping),
                }
            })
            .collect();
        if order % 2 == 1 {
            sections.push(match band {
                Band::Low => Biquad::lowpass_first_order(k),
                Band::High => Biquad::highpass_first_order(k),
            });
        }

        Self { sections, order }
    }

    /// Append another filter's sections after this one's
    #[must_use]
    pub fn then(mut self, other: Self) -> Self {
        self.sections.extend(other.sections);
        self.order += other.order;
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    #[must_use]
    pub fn order(&self) -> usize {
        self.order
    }

    /// Gain at DC of the whole cascade
    #[must_use]
    pub fn dc_gain(&self) -> f64 {
        self.sections.iter().map(Biquad::dc_gain).product()
    }

    /// Samples added on each side before forward-backward filtering
    #[must_use]
    pub fn pad_len(&self) -> usize {
        3 * (self.order + 1)
    }

    /// Run the cascade once, every section starting in the steady state of
    /// a constant input equal to `x[0]`
    fn run(&self, x: &[f64]) -> Vec<f64> {
        let mut level = x.first().copied().unwrap_or(0.0);
        let mut values = x.to_vec();
        for section in &self.sections {
            let [z1, z2] = section.steady_state();
            values = section.run(&values, [z1 * level, z2 * level]);
            level *= section.dc_gain();
        }
        values
    }

    /// Forward-backward filtering with odd-extension padding
    ///
    /// Series shorter than the padding are padded by `n - 1` samples.
    #[must_use]
    pub fn filtfilt(&self, x: &[f64]) -> Vec<f64> {
        let n = x.len();
        if n < 2 || self.is_empty() {
            return x.to_vec();
        }
        let pad = self.pad_len().min(n - 1);

        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|i| 2.0 * x[0] - x[i]));
        ext.extend_from_slice(x);
        ext.extend((1..=pad).map(|i| 2.0 * x[n - 1] - x[n - 1 - i]));

        let forward = self.run(&ext);
        let reversed: Vec<f64> = forward.into_iter().rev().collect();
        let mut backward = self.run(&reversed);
        backward.reverse();

        backward[pad..pad + n].to_vec()
    }
}

/// High-pass and/or low-pass filter applied column-wise to (T, N) signals
#[derive(Clone, Debug, Default)]
pub struct TemporalFilter {
    filter: Butterworth,
}

impl TemporalFilter {
    /// Build the filter for a given repetition time (seconds) and cutoffs (Hz)
    ///
    /// # Errors
    /// Returns error if `t_r` is not positive or a high-pass cutoff is not
    /// strictly between 0 and the Nyquist frequency. A low-pass cutoff at or
    /// above Nyquist is ignored.
    pub fn new(t_r: f64, high_pass: Option<f64>, low_pass: Option<f64>) -> Result<Self> {
        if !(t_r > 0.0 && t_r.is_finite()) {
            return Err(RegcovError::InvalidParameter(format!(
                "repetition time must be positive, got {t_r}"
            )));
        }
        let sample_rate = 1.0 / t_r;
        let nyquist = sample_rate / 2.0;
        let mut filter = Butterworth::default();

        if let Some(hp) = high_pass {
            if !(hp > 0.0 && hp < nyquist) {
                return Err(RegcovError::InvalidParameter(format!(
                    "high-pass cutoff {hp} Hz must lie in (0, {nyquist}) Hz"
                )));
            }
            filter = filter.then(Butterworth::highpass(BUTTERWORTH_ORDER, sample_rate, hp));
        }

        if let Some(lp) = low_pass {
            if lp >= nyquist {
                warn!(
                    low_pass = lp,
                    nyquist, "low-pass cutoff at or above Nyquist frequency, skipping low-pass"
                );
            } else if lp <= 0.0 {
                return Err(RegcovError::InvalidParameter(format!(
                    "low-pass cutoff must be positive, got {lp}"
                )));
            } else {
                filter = filter.then(Butterworth::lowpass(BUTTERWORTH_ORDER, sample_rate, lp));
            }
        }

        Ok(Self { filter })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filter.is_empty()
    }

    /// Filter every column in place
    pub fn apply(&self, signals: &mut Array2<f64>) {
        if self.is_empty() {
            return;
        }
        for mut column in signals.columns_mut() {
            let values = self.filter.filtfilt(&column.to_vec());
            for (dst, src) in column.iter_mut().zip(values) {
                *dst = src;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(n: usize, freq: f64, t_r: f64) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 * t_r).sin())
            .collect()
    }

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    fn passed_fraction(filter: &Butterworth, freq: f64, t_r: f64) -> f64 {
        let input = sine(2000, freq, t_r);
        let output = filter.filtfilt(&input);
        rms(&output[400..1600]) / rms(&input[400..1600])
    }

    #[test]
    fn test_fifth_order_sections() {
        let hp = Butterworth::highpass(5, 0.4, 0.01);
        assert_eq!(hp.order(), 5);
        assert_eq!(hp.sections.len(), 3);
        assert_eq!(hp.pad_len(), 18);
        assert!(hp.sections[2].b[2].abs() < 1e-15);

        let band = hp.then(Butterworth::lowpass(5, 0.4, 0.1));
        assert_eq!(band.order(), 10);
        assert_eq!(band.pad_len(), 33);
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let hp = Butterworth::highpass(BUTTERWORTH_ORDER, 0.4, 0.01);
        assert!(hp.dc_gain().abs() < 1e-12);

        let constant = vec![3.0; 200];
        let filtered = hp.filtfilt(&constant);
        assert!(filtered.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_lowpass_passes_dc() {
        let lp = Butterworth::lowpass(BUTTERWORTH_ORDER, 0.4, 0.05);
        assert!((lp.dc_gain() - 1.0).abs() < 1e-12);

        let constant = vec![2.0; 100];
        let filtered = lp.filtfilt(&constant);
        assert!(filtered.iter().all(|v| (v - 2.0).abs() < 1e-9));
    }

    #[test]
    fn test_highpass_transition_band() {
        // Zero-phase gain is |H|^2 = 1 / (1 + (fc / f)^10) with pre-warping
        let t_r = 2.5;
        let filter = Butterworth::highpass(BUTTERWORTH_ORDER, 1.0 / t_r, 0.01);

        let below = passed_fraction(&filter, 0.005, t_r);
        assert!(below < 0.003, "gain at half the cutoff: {below}");

        let above = passed_fraction(&filter, 0.02, t_r);
        assert!((above - 0.999).abs() < 0.005, "gain at twice the cutoff: {above}");

        let fast = passed_fraction(&filter, 0.1, t_r);
        assert!((fast - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_lowpass_transition_band() {
        let t_r = 2.0;
        let filter = Butterworth::lowpass(BUTTERWORTH_ORDER, 1.0 / t_r, 0.05);

        assert!(passed_fraction(&filter, 0.01, t_r) > 0.99);
        assert!(passed_fraction(&filter, 0.15, t_r) < 0.01);
    }

    #[test]
    fn test_short_signal_is_unchanged_length() {
        let filter = Butterworth::highpass(BUTTERWORTH_ORDER, 0.4, 0.01);
        assert_eq!(filter.filtfilt(&[1.0]), vec![1.0]);
        assert_eq!(filter.filtfilt(&[1.0, 2.0, 3.0]).len(), 3);
    }

    #[test]
    fn test_temporal_filter_validation() {
        assert!(TemporalFilter::new(0.0, Some(0.01), None).is_err());
        assert!(TemporalFilter::new(2.5, Some(0.5), None).is_err());

        let filter = TemporalFilter::new(2.5, None, Some(1.0)).expect("build");
        assert!(filter.is_empty());

        let filter = TemporalFilter::new(2.5, Some(0.01), Some(0.1)).expect("build");
        assert_eq!(filter.filter.order(), 10);
    }

    #[test]
    fn test_apply_filters_columns() {
        let filter = TemporalFilter::new(2.5, Some(0.01), None).expect("build");
        let mut signals = Array2::from_elem((50, 3), 1.5);
        filter.apply(&mut signals);
        assert!(signals.iter().all(|v| v.abs() < 1e-9));
    }
}
