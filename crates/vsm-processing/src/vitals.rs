//! Vital-sign derivation from detected peaks and raw optical windows
//!
//! Every metric is computed from scratch on each call. A metric that cannot
//! be derived (too few beats, flat or zero-mean optical channel, window too
//! short) comes back as `None`; NaN and infinities are filtered out with
//! [`finite`] before anything is returned.

use crate::config::{ProcessingConfig, SpO2Calibration};
use crate::peaks::PeakSet;
use vsm_core::{finite, VitalsSnapshot};

/// Inputs for one compute cycle, all relative to the same analysis window
#[derive(Debug, Clone, Copy)]
pub struct VitalsInput<'a> {
    /// ECG beats (R with Q/S) found in the filtered ECG window
    pub beats: &'a PeakSet,
    /// PPG pulses (systolic peak with foot) found in the filtered IR window
    pub pulses: &'a PeakSet,
    /// Raw red window
    pub red: &'a [f64],
    /// Raw infra-red window
    pub ir: &'a [f64],
    /// Samples in the analysis window
    pub window_len: usize,
}

/// Stateless metric calculator
#[derive(Debug, Clone)]
pub struct VitalsEngine {
    sample_rate_hz: f64,
    calibration: SpO2Calibration,
    dc_from_magnitude: bool,
    min_samples: usize,
}

impl VitalsEngine {
    pub fn new(config: &ProcessingConfig) -> Self {
        VitalsEngine {
            sample_rate_hz: config.sample_rate_hz,
            calibration: config.spo2,
            dc_from_magnitude: config.ppg.polarity.dc_from_magnitude(),
            min_samples: config.min_analysis_samples(),
        }
    }

    /// Derive every metric for one window
    pub fn compute(&self, input: &VitalsInput<'_>) -> VitalsSnapshot {
        let mut snapshot = VitalsSnapshot::empty();
        if input.window_len < self.min_samples {
            return snapshot;
        }

        let r_peaks = input.beats.indices();
        snapshot.bpm = self.compute_hr(&r_peaks);
        snapshot.hrv_sdnn_ms = self.compute_hrv(&r_peaks);
        snapshot.qr_interval_ms = self.compute_qr_interval(input.beats);
        snapshot.crest_time_ms = self.compute_crest_time(input.pulses);
        snapshot.spo2 = self.compute_spo2(input.red, input.ir);
        snapshot
    }

    /// `60 / mean(RR)`; needs at least two R peaks
    pub fn compute_hr(&self, r_peaks: &[usize]) -> Option<f64> {
        let rr = self.intervals_s(r_peaks);
        if rr.is_empty() {
            return None;
        }
        let mean_rr = rr.iter().sum::<f64>() / rr.len() as f64;
        if mean_rr <= 0.0 {
            return None;
        }
        finite(60.0 / mean_rr)
    }

    /// Population standard deviation of RR intervals in ms; needs at least
    /// three R peaks
    pub fn compute_hrv(&self, r_peaks: &[usize]) -> Option<f64> {
        if r_peaks.len() < 3 {
            return None;
        }
        let rr_ms: Vec<f64> = self.intervals_s(r_peaks).iter().map(|s| s * 1000.0).collect();
        let mean = rr_ms.iter().sum::<f64>() / rr_ms.len() as f64;
        let variance = rr_ms.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / rr_ms.len() as f64;
        finite(variance.sqrt())
    }

    /// Ratio-of-ratios SpO2 from raw red and IR windows
    pub fn compute_spo2(&self, red: &[f64], ir: &[f64]) -> Option<f64> {
        let (ac_red, dc_red) = self.ac_dc(red)?;
        let (ac_ir, dc_ir) = self.ac_dc(ir)?;

        let ratio = (ac_red / dc_red) / (ac_ir / dc_ir);
        let cal = &self.calibration;
        let spo2 = (cal.a - cal.b * ratio).clamp(cal.min_percent, cal.max_percent);
        finite(spo2)
    }

    /// Mean R minus Q over beats with a Q point, in ms
    pub fn compute_qr_interval(&self, beats: &PeakSet) -> Option<f64> {
        let spans: Vec<usize> = beats
            .peaks
            .iter()
            .filter_map(|beat| beat.onset.map(|q| beat.index - q))
            .collect();
        self.mean_ms(&spans)
    }

    /// Mean systolic peak minus foot over pulses with a foot before the
    /// peak, in ms
    pub fn compute_crest_time(&self, pulses: &PeakSet) -> Option<f64> {
        let spans: Vec<usize> = pulses
            .peaks
            .iter()
            .filter_map(|pulse| {
                pulse
                    .onset
                    .filter(|&foot| foot < pulse.index)
                    .map(|foot| pulse.index - foot)
            })
            .collect();
        self.mean_ms(&spans)
    }

    /// AC (p95 - p5) and DC of one optical window, `None` below the noise
    /// floor or when either component is not positive
    fn ac_dc(&self, window: &[f64]) -> Option<(f64, f64)> {
        if window.is_empty() {
            return None;
        }
        let ac = percentile(window, 95.0)? - percentile(window, 5.0)?;
        let dc = if self.dc_from_magnitude {
            window.iter().map(|x| x.abs()).sum::<f64>() / window.len() as f64
        } else {
            window.iter().sum::<f64>() / window.len() as f64
        };

        if !(dc > 0.0) || !(ac > 0.0) || ac < self.calibration.noise_floor {
            return None;
        }
        Some((ac, dc))
    }

    fn intervals_s(&self, peaks: &[usize]) -> Vec<f64> {
        peaks
            .windows(2)
            .map(|pair| (pair[1] - pair[0]) as f64 / self.sample_rate_hz)
            .collect()
    }

    fn mean_ms(&self, spans: &[usize]) -> Option<f64> {
        if spans.is_empty() {
            return None;
        }
        let mean_samples = spans.iter().sum::<usize>() as f64 / spans.len() as f64;
        finite(mean_samples * 1000.0 / self.sample_rate_hz)
    }
}

/// Linearly interpolated percentile, `pct` in `[0, 100]`
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=100.0).contains(&pct) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}
