//! Beat-synchronous waveform shapes and heart-rhythm patterns
//!
//! Shapes are functions of the time since the start of a beat (seconds) and
//! are built from Gaussian bumps, which keeps them smooth and cheap.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

fn bump(t: f64, center: f64, width: f64) -> f64 {
    (-((t - center) / width).powi(2)).exp()
}

/// ECG complex in millivolts: P, Q, R, S and T waves
pub fn ecg_complex(t: f64) -> f64 {
    0.15 * bump(t, 0.10, 0.025) - 0.12 * bump(t, 0.185, 0.008) + 1.2 * bump(t, 0.20, 0.009)
        - 0.25 * bump(t, 0.215, 0.009)
        + 0.30 * bump(t, 0.45, 0.045)
}

/// Offset of the R wave from the beat start (seconds)
pub const R_WAVE_AT: f64 = 0.20;

/// Normalised PPG pulse (0..1): systolic upstroke about 0.25s after R,
/// followed by a smaller dicrotic wave
pub fn ppg_pulse(t: f64) -> f64 {
    let systolic = R_WAVE_AT + 0.25;
    bump(t, systolic, 0.07) + 0.35 * bump(t, systolic + 0.25, 0.08)
}

/// Heart sounds: S1 just after R and S2 at the end of the T wave
pub fn pcg_sounds(t: f64) -> f64 {
    let s1 = bump(t, R_WAVE_AT + 0.03, 0.02) * (2.0 * PI * 60.0 * (t - R_WAVE_AT)).sin();
    let s2 = 0.6 * bump(t, 0.50, 0.015) * (2.0 * PI * 90.0 * (t - 0.50)).sin();
    s1 + s2
}

/// How beat-to-beat intervals evolve over time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RhythmPattern {
    /// Fixed rate
    Regular { bpm: f64 },
    /// Normally distributed intervals around a mean rate
    Variable {
        bpm: f64,
        /// Standard deviation of the RR interval in milliseconds
        sdnn_ms: f64,
    },
    /// Linear rate change, then constant
    Ramp {
        start_bpm: f64,
        end_bpm: f64,
        duration_s: f64,
    },
    /// Sinusoidal rate modulation at breathing frequency
    Respiratory {
        bpm: f64,
        depth_bpm: f64,
        breaths_per_min: f64,
    },
}

impl RhythmPattern {
    /// Mean heart rate at `time`
    pub fn bpm_at(&self, time: f64) -> f64 {
        match *self {
            RhythmPattern::Regular { bpm } | RhythmPattern::Variable { bpm, .. } => bpm,
            RhythmPattern::Ramp {
                start_bpm,
                end_bpm,
                duration_s,
            } => {
                if time >= duration_s {
                    end_bpm
                } else {
                    start_bpm + (end_bpm - start_bpm) * (time / duration_s)
                }
            }
            RhythmPattern::Respiratory {
                bpm,
                depth_bpm,
                breaths_per_min,
            } => bpm + depth_bpm * (2.0 * PI * breaths_per_min / 60.0 * time).sin(),
        }
    }

    /// Length of the beat starting at `time` (seconds), never below 0.25s
    pub fn next_interval<R: Rng>(&self, time: f64, rng: &mut R) -> f64 {
        let mean = 60.0 / self.bpm_at(time).max(1.0);
        let interval = match *self {
            RhythmPattern::Variable { sdnn_ms, .. } if sdnn_ms > 0.0 => {
                match Normal::new(mean, sdnn_ms / 1000.0) {
                    Ok(normal) => normal.sample(rng),
                    Err(_) => mean,
                }
            }
            _ => mean,
        };
        interval.max(0.25)
    }

    /// Get pattern description
    pub fn description(&self) -> &'static str {
        match self {
            RhythmPattern::Regular { .. } => "Regular sinus rhythm",
            RhythmPattern::Variable { .. } => "Sinus rhythm with variability",
            RhythmPattern::Ramp { .. } => "Rate ramp",
            RhythmPattern::Respiratory { .. } => "Respiratory sinus arrhythmia",
        }
    }

    /// Common rhythms for demos
    pub fn presets() -> Vec<(&'static str, RhythmPattern)> {
        vec![
            ("Resting", RhythmPattern::Regular { bpm: 60.0 }),
            ("Normal", RhythmPattern::Variable { bpm: 72.0, sdnn_ms: 40.0 }),
            ("Tachycardia", RhythmPattern::Regular { bpm: 130.0 }),
            ("Bradycardia", RhythmPattern::Regular { bpm: 45.0 }),
            (
                "Exercise",
                RhythmPattern::Ramp {
                    start_bpm: 70.0,
                    end_bpm: 140.0,
                    duration_s: 60.0,
                },
            ),
            (
                "Breathing",
                RhythmPattern::Respiratory {
                    bpm: 65.0,
                    depth_bpm: 5.0,
                    breaths_per_min: 12.0,
                },
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn argmax(f: fn(f64) -> f64) -> f64 {
        (0..1000)
            .map(|i| i as f64 / 1000.0)
            .max_by(|a, b| f(*a).total_cmp(&f(*b)))
            .unwrap()
    }

    #[test]
    fn test_ecg_r_wave_dominates() {
        assert!((argmax(ecg_complex) - R_WAVE_AT).abs() < 0.002);
        assert!(ecg_complex(R_WAVE_AT) > 1.0);
        // Q and S dip below baseline
        assert!(ecg_complex(0.183) < 0.0);
        assert!(ecg_complex(0.222) < 0.0);
    }

    #[test]
    fn test_ppg_peak_follows_r() {
        let peak = argmax(ppg_pulse);
        assert!(peak > R_WAVE_AT + 0.2 && peak < R_WAVE_AT + 0.3);
        assert!(ppg_pulse(peak) <= 1.01);
    }

    #[test]
    fn test_regular_rhythm_interval() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let rhythm = RhythmPattern::Regular { bpm: 75.0 };
        assert_eq!(rhythm.next_interval(0.0, &mut rng), 0.8);
    }

    #[test]
    fn test_ramp_and_floor() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let ramp = RhythmPattern::Ramp {
            start_bpm: 60.0,
            end_bpm: 120.0,
            duration_s: 10.0,
        };
        assert_eq!(ramp.bpm_at(5.0), 90.0);
        assert_eq!(ramp.bpm_at(20.0), 120.0);

        let fast = RhythmPattern::Regular { bpm: 400.0 };
        assert_eq!(fast.next_interval(0.0, &mut rng), 0.25);
    }

    #[test]
    fn test_variable_rhythm_spreads() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let rhythm = RhythmPattern::Variable { bpm: 60.0, sdnn_ms: 50.0 };
        let intervals: Vec<f64> = (0..200).map(|_| rhythm.next_interval(0.0, &mut rng)).collect();
        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        assert!((mean - 1.0).abs() < 0.02);
        assert!(intervals.iter().any(|&x| (x - 1.0).abs() > 0.01));
    }

    #[test]
    fn test_presets_are_plausible() {
        let presets = RhythmPattern::presets();
        for (name, rhythm) in &presets {
            let bpm = rhythm.bpm_at(0.0);
            assert!(bpm > 30.0 && bpm < 200.0, "{} starts at {} bpm", name, bpm);
        }
        assert!(presets.iter().any(|(name, _)| *name == "Resting"));
    }
}
