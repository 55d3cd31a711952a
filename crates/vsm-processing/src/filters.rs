//! Digital filters for biosignal processing
//!
//! Filters are designed once into cascades of second-order sections and
//! applied forward and backward over a whole window (zero-phase), so peak
//! positions in the output line up with the input sample clock.
//!
//! Application is stateless: every call starts from the window it is given
//! and carries nothing over to the next call. Consecutive, overlapping
//! windows are therefore filtered independently and each one shows its own
//! edge transients. Odd-symmetric padding and steady-state initial
//! conditions keep those transients short, but they are not removed; code
//! that needs a continuous filtered stream must not stitch windows together.

use crate::config::{BandConfig, NotchConfig, ProcessingConfig};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use vsm_core::{Channel, VsmError, VsmResult};

/// Highest supported Butterworth order
pub const MAX_ORDER: usize = 8;

/// Filter types supported by the framework
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FilterKind {
    /// Butterworth lowpass filter
    Lowpass { cutoff_hz: f64 },
    /// Butterworth highpass filter
    Highpass { cutoff_hz: f64 },
    /// Butterworth bandpass filter (highpass and lowpass in cascade)
    Bandpass { low_hz: f64, high_hz: f64 },
    /// Notch filter for powerline interference
    Notch { freq_hz: f64, quality: f64 },
}

impl FilterKind {
    fn name(&self) -> &'static str {
        match self {
            FilterKind::Lowpass { .. } => "lowpass",
            FilterKind::Highpass { .. } => "highpass",
            FilterKind::Bandpass { .. } => "bandpass",
            FilterKind::Notch { .. } => "notch",
        }
    }
}

/// Single biquad section (2nd order), `a0` normalized to 1.
///
/// A first-order section is a biquad with `b2 == a2 == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Biquad {
    // y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    /// Gain at 0 Hz
    pub fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }

    /// Filter `data` in place, starting from the steady state for a constant
    /// input equal to `data[0]`.
    fn run(&self, data: &mut [f64]) {
        let Some(&x0) = data.first() else {
            return;
        };

        // Transposed direct form II state at steady state
        let y0 = self.dc_gain() * x0;
        let mut s2 = self.b2 * x0 - self.a2 * y0;
        let mut s1 = self.b1 * x0 - self.a1 * y0 + s2;

        for sample in data.iter_mut() {
            let x = *sample;
            let y = self.b0 * x + s1;
            s1 = self.b1 * x - self.a1 * y + s2;
            s2 = self.b2 * x - self.a2 * y;
            *sample = y;
        }
    }

    fn lowpass(k: f64, q: f64) -> Self {
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);
        let b0 = k2 * norm;
        Biquad {
            b0,
            b1: 2.0 * b0,
            b2: b0,
            a1: 2.0 * (k2 - 1.0) * norm,
            a2: (1.0 - k / q + k2) * norm,
        }
    }

    fn highpass(k: f64, q: f64) -> Self {
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);
        Biquad {
            b0: norm,
            b1: -2.0 * norm,
            b2: norm,
            a1: 2.0 * (k2 - 1.0) * norm,
            a2: (1.0 - k / q + k2) * norm,
        }
    }

    fn first_order_lowpass(k: f64) -> Self {
        let norm = 1.0 / (1.0 + k);
        Biquad {
            b0: k * norm,
            b1: k * norm,
            b2: 0.0,
            a1: (k - 1.0) * norm,
            a2: 0.0,
        }
    }

    fn first_order_highpass(k: f64) -> Self {
        let norm = 1.0 / (1.0 + k);
        Biquad {
            b0: norm,
            b1: -norm,
            b2: 0.0,
            a1: (k - 1.0) * norm,
            a2: 0.0,
        }
    }
}

/// An immutable, designed filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    kind: FilterKind,
    order: usize,
    sample_rate_hz: f64,
    sections: Vec<Biquad>,
}

impl FilterSpec {
    /// Butterworth lowpass of the given order
    pub fn lowpass(cutoff_hz: f64, order: usize, sample_rate_hz: f64) -> VsmResult<Self> {
        let kind = FilterKind::Lowpass { cutoff_hz };
        check_order(&kind, order)?;
        let k = prewarp(&kind, cutoff_hz, sample_rate_hz)?;

        Ok(FilterSpec {
            kind,
            order,
            sample_rate_hz,
            sections: butterworth_sections(order, k, Biquad::lowpass, Biquad::first_order_lowpass),
        })
    }

    /// Butterworth highpass of the given order
    pub fn highpass(cutoff_hz: f64, order: usize, sample_rate_hz: f64) -> VsmResult<Self> {
        let kind = FilterKind::Highpass { cutoff_hz };
        check_order(&kind, order)?;
        let k = prewarp(&kind, cutoff_hz, sample_rate_hz)?;

        Ok(FilterSpec {
            kind,
            order,
            sample_rate_hz,
            sections: butterworth_sections(
                order,
                k,
                Biquad::highpass,
                Biquad::first_order_highpass,
            ),
        })
    }

    /// Butterworth bandpass: an order-`order` highpass at `low_hz` followed
    /// by an order-`order` lowpass at `high_hz`
    pub fn bandpass(
        low_hz: f64,
        high_hz: f64,
        order: usize,
        sample_rate_hz: f64,
    ) -> VsmResult<Self> {
        let kind = FilterKind::Bandpass { low_hz, high_hz };
        check_order(&kind, order)?;
        if !(low_hz < high_hz) {
            return Err(design_error(
                &kind,
                format!("low cutoff {}Hz must be below high cutoff {}Hz", low_hz, high_hz),
            ));
        }
        let k_low = prewarp(&kind, low_hz, sample_rate_hz)?;
        let k_high = prewarp(&kind, high_hz, sample_rate_hz)?;

        let mut sections =
            butterworth_sections(order, k_low, Biquad::highpass, Biquad::first_order_highpass);
        sections.extend(butterworth_sections(
            order,
            k_high,
            Biquad::lowpass,
            Biquad::first_order_lowpass,
        ));

        Ok(FilterSpec {
            kind,
            order,
            sample_rate_hz,
            sections,
        })
    }

    /// Second-order notch at `freq_hz` with quality factor `quality`
    pub fn notch(freq_hz: f64, quality: f64, sample_rate_hz: f64) -> VsmResult<Self> {
        let kind = FilterKind::Notch { freq_hz, quality };
        prewarp(&kind, freq_hz, sample_rate_hz)?;
        if !(quality > 0.0) || !quality.is_finite() {
            return Err(design_error(&kind, format!("quality factor {} must be positive", quality)));
        }

        let omega = 2.0 * PI * freq_hz / sample_rate_hz;
        let alpha = omega.sin() / (2.0 * quality);
        let cos_omega = omega.cos();
        let a0 = 1.0 + alpha;

        let section = Biquad {
            b0: 1.0 / a0,
            b1: -2.0 * cos_omega / a0,
            b2: 1.0 / a0,
            a1: -2.0 * cos_omega / a0,
            a2: (1.0 - alpha) / a0,
        };

        Ok(FilterSpec {
            kind,
            order: 2,
            sample_rate_hz,
            sections: vec![section],
        })
    }

    /// Build a bandpass from configuration
    pub fn from_band(band: &BandConfig, sample_rate_hz: f64) -> VsmResult<Self> {
        Self::bandpass(band.low_hz, band.high_hz, band.order, sample_rate_hz)
    }

    /// Build a notch from configuration
    pub fn from_notch(notch: &NotchConfig, sample_rate_hz: f64) -> VsmResult<Self> {
        Self::notch(notch.freq_hz, notch.quality, sample_rate_hz)
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Samples of odd-symmetric padding added on each side before filtering
    pub fn pad_len(&self) -> usize {
        3 * (2 * self.sections.len() + 1)
    }

    /// Shortest window that gets filtered; shorter ones pass through as-is
    pub fn min_window_len(&self) -> usize {
        self.pad_len() + 1
    }

    /// Single forward pass through every section, in place
    fn run_forward(&self, data: &mut [f64]) {
        for section in &self.sections {
            section.run(data);
        }
    }
}

fn check_order(kind: &FilterKind, order: usize) -> VsmResult<()> {
    if order == 0 || order > MAX_ORDER {
        return Err(design_error(kind, format!("order {} outside 1..={}", order, MAX_ORDER)));
    }
    Ok(())
}

/// Bilinear-transform prewarp `tan(pi * f / fs)`, validating `0 < f < fs/2`
fn prewarp(kind: &FilterKind, freq_hz: f64, sample_rate_hz: f64) -> VsmResult<f64> {
    if !(sample_rate_hz > 0.0) || !sample_rate_hz.is_finite() {
        let reason = format!("sample rate {}Hz must be positive", sample_rate_hz);
        return Err(design_error(kind, reason));
    }
    if !(freq_hz > 0.0) || freq_hz >= sample_rate_hz / 2.0 {
        let reason = format!(
            "frequency {}Hz must lie strictly between 0 and Nyquist ({}Hz)",
            freq_hz,
            sample_rate_hz / 2.0
        );
        return Err(design_error(kind, reason));
    }
    Ok((PI * freq_hz / sample_rate_hz).tan())
}

/// Butterworth poles grouped into conjugate pairs, plus one real pole for
/// odd orders
fn butterworth_sections(
    order: usize,
    k: f64,
    pair: fn(f64, f64) -> Biquad,
    single: fn(f64) -> Biquad,
) -> Vec<Biquad> {
    let mut sections: Vec<Biquad> = (0..order / 2)
        .map(|i| {
            let theta = (2 * i + 1) as f64 * PI / (2 * order) as f64;
            pair(k, 1.0 / (2.0 * theta.sin()))
        })
        .collect();

    if order % 2 == 1 {
        sections.push(single(k));
    }
    sections
}

fn design_error(kind: &FilterKind, reason: String) -> VsmError {
    VsmError::InvalidFilter {
        filter: kind.name(),
        reason,
    }
}

/// Per-channel filter chains built from [`ProcessingConfig`]
#[derive(Debug, Clone)]
pub struct FilterBank {
    ecg: Vec<FilterSpec>,
    ppg: Vec<FilterSpec>,
    pcg: Vec<FilterSpec>,
}

impl FilterBank {
    /// Design every chain described by the configuration
    pub fn new(config: &ProcessingConfig) -> VsmResult<Self> {
        let fs = config.sample_rate_hz;

        let mut ecg = vec![FilterSpec::from_band(&config.ecg.bandpass, fs)?];
        if let Some(notch) = &config.ecg.notch {
            ecg.push(FilterSpec::from_notch(notch, fs)?);
        }

        let ppg = vec![FilterSpec::from_band(&config.ppg.bandpass, fs)?];

        let mut pcg = vec![FilterSpec::from_band(&config.pcg.bandpass, fs)?];
        if let Some(notch) = &config.pcg.notch {
            pcg.push(FilterSpec::from_notch(notch, fs)?);
        }

        Ok(FilterBank { ecg, ppg, pcg })
    }

    /// Zero-phase application of one filter to a window.
    ///
    /// Windows shorter than [`FilterSpec::min_window_len`] come back
    /// unfiltered.
    pub fn apply(spec: &FilterSpec, window: &[f64]) -> Vec<f64> {
        if window.len() < spec.min_window_len() {
            return window.to_vec();
        }

        let n = window.len();
        let pad = spec.pad_len().min(n - 1);
        let first = window[0];
        let last = window[n - 1];

        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - window[i]));
        extended.extend_from_slice(window);
        extended.extend((1..=pad).map(|i| 2.0 * last - window[n - 1 - i]));

        spec.run_forward(&mut extended);
        extended.reverse();
        spec.run_forward(&mut extended);
        extended.reverse();

        extended[pad..pad + n].to_vec()
    }

    /// Zero-phase application of a whole chain.
    ///
    /// Either every stage runs or none does: a window too short for any
    /// stage of the chain is returned unfiltered.
    pub fn apply_chain(chain: &[FilterSpec], window: &[f64]) -> Vec<f64> {
        let min_len = chain.iter().map(FilterSpec::min_window_len).max().unwrap_or(0);
        if window.len() < min_len {
            return window.to_vec();
        }

        chain
            .iter()
            .fold(window.to_vec(), |signal, spec| Self::apply(spec, &signal))
    }

    /// Filters configured for one channel
    pub fn chain(&self, channel: Channel) -> &[FilterSpec] {
        match channel {
            Channel::Ecg => &self.ecg,
            Channel::Red | Channel::Ir => &self.ppg,
            Channel::Pcg => &self.pcg,
        }
    }

    /// Run one channel's chain over a window
    pub fn filter_channel(&self, channel: Channel, window: &[f64]) -> Vec<f64> {
        Self::apply_chain(self.chain(channel), window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const FS: f64 = 1000.0;

    fn sine(freq_hz: f64, amplitude: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq_hz * i as f64 / FS).sin())
            .collect()
    }

    /// RMS over the middle half, away from edge transients
    fn mid_rms(signal: &[f64]) -> f64 {
        let start = signal.len() / 4;
        let mid = &signal[start..signal.len() - start];
        (mid.iter().map(|x| x * x).sum::<f64>() / mid.len() as f64).sqrt()
    }

    #[test]
    fn test_butterworth_section_count() {
        assert_eq!(FilterSpec::lowpass(40.0, 1, FS).unwrap().sections().len(), 1);
        assert_eq!(FilterSpec::lowpass(40.0, 2, FS).unwrap().sections().len(), 1);
        assert_eq!(FilterSpec::lowpass(40.0, 5, FS).unwrap().sections().len(), 3);
        assert_eq!(FilterSpec::bandpass(0.5, 49.0, 2, FS).unwrap().sections().len(), 2);
    }

    #[test]
    fn test_dc_gains() {
        let lowpass = FilterSpec::lowpass(40.0, 4, FS).unwrap();
        let dc: f64 = lowpass.sections().iter().map(Biquad::dc_gain).product();
        assert_relative_eq!(dc, 1.0, epsilon = 1e-9);

        let highpass = FilterSpec::highpass(0.5, 3, FS).unwrap();
        let dc: f64 = highpass.sections().iter().map(Biquad::dc_gain).product();
        assert_relative_eq!(dc, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_designs_rejected() {
        assert!(FilterSpec::lowpass(500.0, 2, FS).is_err()); // at Nyquist
        assert!(FilterSpec::lowpass(0.0, 2, FS).is_err());
        assert!(FilterSpec::lowpass(10.0, 0, FS).is_err());
        assert!(FilterSpec::lowpass(10.0, MAX_ORDER + 1, FS).is_err());
        assert!(FilterSpec::bandpass(49.0, 0.5, 2, FS).is_err());
        assert!(FilterSpec::notch(50.0, 0.0, FS).is_err());
        assert!(FilterSpec::notch(50.0, 30.0, 0.0).is_err());
    }

    #[test]
    fn test_zero_window_stays_zero() {
        let spec = FilterSpec::bandpass(0.5, 49.0, 2, FS).unwrap();
        let output = FilterBank::apply(&spec, &vec![0.0; 2000]);
        assert_eq!(output.len(), 2000);
        assert!(output.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_short_window_passes_through() {
        let spec = FilterSpec::bandpass(0.5, 49.0, 2, FS).unwrap();
        let window: Vec<f64> = (0..spec.min_window_len() - 1).map(|i| i as f64).collect();
        assert_eq!(FilterBank::apply(&spec, &window), window);
        assert!(FilterBank::apply(&spec, &[]).is_empty());
    }

    #[test]
    fn test_passband_center_beats_stopband() {
        let (low, high) = (0.5, 49.0);
        let spec = FilterSpec::bandpass(low, high, 2, FS).unwrap();
        let center = (low * high).sqrt();

        let pass = FilterBank::apply(&spec, &sine(center, 100.0, 4000));
        let stop = FilterBank::apply(&spec, &sine(2.0 * high, 100.0, 4000));

        let pass_gain = mid_rms(&pass) / mid_rms(&sine(center, 100.0, 4000));
        let stop_gain = mid_rms(&stop) / mid_rms(&sine(2.0 * high, 100.0, 4000));
        assert!(pass_gain > stop_gain);
        assert!(pass_gain > 0.9);
        assert!(stop_gain < 0.1);
    }

    #[test]
    fn test_notch_removes_mains() {
        let spec = FilterSpec::notch(50.0, 30.0, FS).unwrap();
        let hum = FilterBank::apply(&spec, &sine(50.0, 1.0, 4000));
        let wanted = FilterBank::apply(&spec, &sine(10.0, 1.0, 4000));
        assert!(mid_rms(&hum) < 0.05);
        assert!(mid_rms(&wanted) > 0.65);
    }

    #[test]
    fn test_zero_phase_keeps_peak_position() {
        // A smooth bump well inside the passband must not move
        let window: Vec<f64> = (0..3000)
            .map(|i| {
                let t = (i as f64 - 1500.0) / 40.0;
                100.0 * (-t * t).exp()
            })
            .collect();
        let spec = FilterSpec::lowpass(20.0, 4, FS).unwrap();
        let output = FilterBank::apply(&spec, &window);

        let argmax = output
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((argmax as i64 - 1500).abs() <= 1);
    }

    #[test]
    fn test_filter_bank_chains() {
        let bank = FilterBank::new(&ProcessingConfig::default()).unwrap();
        assert_eq!(bank.chain(Channel::Ecg).len(), 2); // bandpass + notch
        assert_eq!(bank.chain(Channel::Red).len(), 1);
        assert_eq!(bank.chain(Channel::Red), bank.chain(Channel::Ir));

        let output = bank.filter_channel(Channel::Pcg, &sine(100.0, 1.0, 2000));
        assert_eq!(output.len(), 2000);
    }
}
