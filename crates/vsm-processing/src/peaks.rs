//! Peak and fiducial-point detection
//!
//! Peaks are strict local maxima that clear a height threshold and sit at
//! least a minimum distance apart. When two candidates compete for the same
//! distance slot the taller one is kept (the earlier one on ties). Flat tops
//! report their middle sample. The first and last sample of a window are
//! never peaks.

use crate::config::DetectionConfig;
use serde::{Deserialize, Serialize};

/// How the height threshold is derived from the window being searched
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HeightRule {
    /// Fixed fraction of the window maximum
    FractionOfMax(f64),
    /// Arithmetic mean of the window
    WindowMean,
}

impl HeightRule {
    /// Threshold for `signal`, `None` for an empty or non-finite window
    pub fn threshold(&self, signal: &[f64]) -> Option<f64> {
        if signal.is_empty() {
            return None;
        }
        let value = match self {
            HeightRule::FractionOfMax(fraction) => {
                fraction * signal.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            }
            HeightRule::WindowMean => signal.iter().sum::<f64>() / signal.len() as f64,
        };
        value.is_finite().then_some(value)
    }
}

/// A detected peak with optional fiducial points around it.
///
/// For ECG beats `onset` is the Q point and `offset` the S point. For PPG
/// pulses `onset` is the pulse foot and `offset` is unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peak {
    pub index: usize,
    pub onset: Option<usize>,
    pub offset: Option<usize>,
}

impl Peak {
    pub fn bare(index: usize) -> Self {
        Peak {
            index,
            onset: None,
            offset: None,
        }
    }
}

/// Peaks of one window in ascending index order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakSet {
    pub peaks: Vec<Peak>,
}

impl PeakSet {
    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    /// Peak indices, ascending
    pub fn indices(&self) -> Vec<usize> {
        self.peaks.iter().map(|p| p.index).collect()
    }
}

/// Indices of the peaks in `signal`.
///
/// Only samples with value `>= min_height` qualify, and any two returned
/// peaks are at least `min_distance` samples apart. Output is ascending.
pub fn find_peaks(signal: &[f64], min_distance: usize, min_height: f64) -> Vec<usize> {
    let candidates: Vec<usize> = local_maxima(signal)
        .into_iter()
        .filter(|&i| signal[i] >= min_height)
        .collect();

    if min_distance <= 1 || candidates.len() < 2 {
        return candidates;
    }

    // Tallest first, earliest first on equal height
    let mut priority: Vec<usize> = (0..candidates.len()).collect();
    priority.sort_by(|&a, &b| {
        signal[candidates[b]]
            .total_cmp(&signal[candidates[a]])
            .then(candidates[a].cmp(&candidates[b]))
    });

    let mut keep = vec![true; candidates.len()];
    for &slot in &priority {
        if !keep[slot] {
            continue;
        }
        let center = candidates[slot];

        for other in (0..slot).rev() {
            if center - candidates[other] >= min_distance {
                break;
            }
            keep[other] = false;
        }
        for other in slot + 1..candidates.len() {
            if candidates[other] - center >= min_distance {
                break;
            }
            keep[other] = false;
        }
    }

    candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(index, kept)| kept.then_some(index))
        .collect()
}

/// Strict local maxima; plateaus report their midpoint
fn local_maxima(signal: &[f64]) -> Vec<usize> {
    let mut maxima = Vec::new();
    if signal.len() < 3 {
        return maxima;
    }

    let last = signal.len() - 1;
    let mut i = 1;
    while i < last {
        if signal[i - 1] < signal[i] {
            let mut ahead = i + 1;
            while ahead < last && signal[ahead] == signal[i] {
                ahead += 1;
            }
            if signal[ahead] < signal[i] {
                maxima.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    maxima
}

/// Index of the first minimum of `signal[range]`, absolute
fn argmin(signal: &[f64], start: usize, end: usize) -> Option<usize> {
    let end = end.min(signal.len());
    if start >= end {
        return None;
    }
    (start..end).reduce(|best, i| if signal[i] < signal[best] { i } else { best })
}

/// Peak detector bound to one channel's detection settings and sample rate
#[derive(Debug, Clone)]
pub struct PeakDetector {
    min_distance: usize,
    height: HeightRule,
    fiducial_window: usize,
}

impl PeakDetector {
    pub fn new(config: &DetectionConfig, sample_rate_hz: f64) -> Self {
        PeakDetector {
            min_distance: seconds_to_samples(config.min_distance_s, sample_rate_hz).max(1),
            height: config.height,
            fiducial_window: seconds_to_samples(config.fiducial_window_s, sample_rate_hz),
        }
    }

    /// Minimum peak spacing in samples
    pub fn min_distance(&self) -> usize {
        self.min_distance
    }

    /// Fiducial search window in samples
    pub fn fiducial_window(&self) -> usize {
        self.fiducial_window
    }

    /// Peak indices under this detector's height rule
    pub fn find(&self, signal: &[f64]) -> Vec<usize> {
        match self.height.threshold(signal) {
            Some(min_height) => find_peaks(signal, self.min_distance, min_height),
            None => Vec::new(),
        }
    }

    /// R peaks of a filtered ECG window, each with its Q point (minimum in
    /// the window before R) and S point (minimum in the window after R)
    pub fn detect_beats(&self, ecg: &[f64]) -> PeakSet {
        let w = self.fiducial_window;
        let peaks = self
            .find(ecg)
            .into_iter()
            .map(|r| Peak {
                index: r,
                onset: argmin(ecg, r.saturating_sub(w), r),
                offset: argmin(ecg, r + 1, r + 1 + w),
            })
            .collect();
        PeakSet { peaks }
    }

    /// Systolic peaks of a filtered PPG window, each with the pulse foot
    /// (minimum in the window before the peak)
    pub fn detect_pulses(&self, ppg: &[f64]) -> PeakSet {
        let w = self.fiducial_window;
        let peaks = self
            .find(ppg)
            .into_iter()
            .map(|p| Peak {
                index: p,
                onset: argmin(ppg, p.saturating_sub(w), p),
                offset: None,
            })
            .collect();
        PeakSet { peaks }
    }
}

fn seconds_to_samples(seconds: f64, sample_rate_hz: f64) -> usize {
    let samples = (seconds * sample_rate_hz).round();
    if samples.is_finite() && samples > 0.0 {
        samples as usize
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Narrow triangular pulses of height `amplitude` every `period` samples
    fn pulse_train(len: usize, first: usize, period: usize, amplitude: f64) -> Vec<f64> {
        let mut signal = vec![0.0; len];
        let mut center = first;
        while center + 3 < len {
            for offset in 0..=3usize {
                let value = amplitude * (1.0 - offset as f64 / 4.0);
                signal[center + offset] = value;
                if let Some(left) = center.checked_sub(offset) {
                    signal[left] = value;
                }
            }
            center += period;
        }
        signal
    }

    #[test]
    fn test_pulse_train_count() {
        // 5 pulses at 100, 300, 500, 700, 900
        let signal = pulse_train(1000, 100, 200, 10.0);
        let peaks = find_peaks(&signal, 50, 5.0);
        assert_eq!(peaks, vec![100, 300, 500, 700, 900]);
    }

    #[test]
    fn test_peaks_respect_distance_and_height() {
        let signal = pulse_train(3000, 37, 173, 8.0);
        let peaks = find_peaks(&signal, 120, 4.0);
        for pair in peaks.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[1] - pair[0] >= 120);
        }
        assert!(peaks.iter().all(|&i| signal[i] >= 4.0));
    }

    #[test]
    fn test_taller_peak_wins_distance_conflict() {
        let mut signal = vec![0.0; 100];
        signal[40] = 3.0;
        signal[50] = 5.0;
        signal[60] = 4.0;
        assert_eq!(find_peaks(&signal, 15, 0.0), vec![50]);

        // Earlier index wins ties
        signal[60] = 5.0;
        assert_eq!(find_peaks(&signal, 15, 0.0), vec![50]);
    }

    #[test]
    fn test_plateau_midpoint_and_edges() {
        let signal = [5.0, 1.0, 3.0, 3.0, 3.0, 1.0, 0.0, 7.0];
        // Edges are never peaks, plateau 2..=4 reports 3
        assert_eq!(find_peaks(&signal, 1, 0.0), vec![3]);
        assert!(find_peaks(&[1.0, 2.0], 1, 0.0).is_empty());
        assert!(find_peaks(&[], 1, 0.0).is_empty());
    }

    #[test]
    fn test_height_rules() {
        let signal = [0.0, 2.0, 4.0, 10.0];
        assert_eq!(HeightRule::FractionOfMax(0.5).threshold(&signal), Some(5.0));
        assert_eq!(HeightRule::WindowMean.threshold(&signal), Some(4.0));
        assert_eq!(HeightRule::WindowMean.threshold(&[]), None);
    }

    #[test]
    fn test_beats_carry_q_and_s() {
        let config = DetectionConfig {
            min_distance_s: 0.4,
            height: HeightRule::FractionOfMax(0.6),
            fiducial_window_s: 0.05,
        };
        let detector = PeakDetector::new(&config, 1000.0);
        assert_eq!(detector.fiducial_window(), 50);

        let mut ecg = pulse_train(2000, 500, 1000, 10.0);
        ecg[480] = -3.0; // Q
        ecg[530] = -2.0; // S

        let beats = detector.detect_beats(&ecg);
        assert_eq!(beats.indices(), vec![500, 1500]);
        assert_eq!(beats.peaks[0].onset, Some(480));
        assert_eq!(beats.peaks[0].offset, Some(530));
    }

    #[test]
    fn test_fiducials_at_window_edges() {
        let config = DetectionConfig {
            min_distance_s: 0.1,
            height: HeightRule::FractionOfMax(0.5),
            fiducial_window_s: 0.05,
        };
        let detector = PeakDetector::new(&config, 1000.0);

        // Peak at the second-to-last sample: S window is clipped to one sample
        let mut ecg = vec![0.0; 200];
        ecg[197] = 1.0;
        ecg[198] = 5.0;
        let beats = detector.detect_beats(&ecg);
        assert_eq!(beats.indices(), vec![198]);
        assert_eq!(beats.peaks[0].offset, Some(199));

        // Peak at index 1: foot search only sees index 0
        let mut ppg = vec![0.0; 200];
        ppg[1] = 5.0;
        let pulses = detector.detect_pulses(&ppg);
        assert_eq!(pulses.peaks[0].onset, Some(0));
    }
}
