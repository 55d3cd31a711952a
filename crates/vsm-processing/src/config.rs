//! Configuration for the vitals processing chain

use crate::filters::FilterBank;
use crate::peaks::HeightRule;
use serde::{Deserialize, Serialize};
use std::path::Path;
use vsm_core::{config_error, VsmError, VsmResult};

/// Global processing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Configuration name/profile
    pub name: String,
    /// Target use case
    pub profile: ProcessingProfile,
    /// Acquisition sample rate shared by all channels (Hz)
    pub sample_rate_hz: f64,
    /// Windows shorter than this yield no metrics (seconds)
    pub min_analysis_seconds: f64,
    /// ECG filtering and beat detection
    pub ecg: EcgConfig,
    /// PPG filtering and pulse detection (red and IR share it)
    pub ppg: PpgConfig,
    /// PCG display filtering
    pub pcg: PcgConfig,
    /// Ratio-of-ratios SpO2 calibration
    pub spo2: SpO2Calibration,
}

/// Processing profiles for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingProfile {
    /// Live bedside monitoring from a raw device stream
    RealTime,
    /// Analysis of recorded captures with pre-inverted optical channels
    Offline,
    /// Custom profile
    Custom,
}

/// Butterworth bandpass parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandConfig {
    pub low_hz: f64,
    pub high_hz: f64,
    /// Order of each of the highpass and lowpass halves
    pub order: usize,
}

/// Powerline notch parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NotchConfig {
    pub freq_hz: f64,
    pub quality: f64,
}

/// Peak detection parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Minimum spacing between peaks (seconds)
    pub min_distance_s: f64,
    /// Height threshold rule
    pub height: HeightRule,
    /// Search window for Q/S or pulse foot around each peak (seconds)
    pub fiducial_window_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EcgConfig {
    pub bandpass: BandConfig,
    pub notch: Option<NotchConfig>,
    pub detection: DetectionConfig,
}

/// Orientation of the optical channels as they arrive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PpgPolarity {
    /// Device values fall on each pulse; negated before filtering and
    /// detection so pulses point up
    Inverted,
    /// Pulses already point up
    Upright,
    /// Source already negated the values; DC is taken from magnitudes
    PreInverted,
}

impl PpgPolarity {
    /// Whether windows are negated before filtering
    pub fn negate(self) -> bool {
        matches!(self, PpgPolarity::Inverted)
    }

    /// Whether the DC level is the mean magnitude rather than the mean
    pub fn dc_from_magnitude(self) -> bool {
        matches!(self, PpgPolarity::PreInverted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PpgConfig {
    pub bandpass: BandConfig,
    pub polarity: PpgPolarity,
    pub detection: DetectionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PcgConfig {
    pub bandpass: BandConfig,
    pub notch: Option<NotchConfig>,
}

/// Linear calibration `spo2 = a - b * R`, clamped to `[min_percent, max_percent]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpO2Calibration {
    pub a: f64,
    pub b: f64,
    pub min_percent: f64,
    pub max_percent: f64,
    /// AC amplitudes below this (raw counts) are treated as no signal
    pub noise_floor: f64,
}

impl Default for SpO2Calibration {
    fn default() -> Self {
        SpO2Calibration {
            a: 104.0,
            b: 17.0,
            min_percent: 60.0,
            max_percent: 100.0,
            noise_floor: 10.0,
        }
    }
}

const MAINS_NOTCH: NotchConfig = NotchConfig {
    freq_hz: 50.0,
    quality: 30.0,
};

/// Preset configurations for common scenarios
impl ProcessingConfig {
    /// Live monitoring of a 1 kHz device stream
    pub fn realtime() -> Self {
        ProcessingConfig {
            name: "Real-time bedside".to_string(),
            profile: ProcessingProfile::RealTime,
            sample_rate_hz: 1000.0,
            min_analysis_seconds: 2.0,
            ecg: EcgConfig {
                bandpass: BandConfig {
                    low_hz: 0.5,
                    high_hz: 49.0,
                    order: 2,
                },
                notch: Some(MAINS_NOTCH),
                detection: DetectionConfig {
                    min_distance_s: 0.4,
                    height: HeightRule::FractionOfMax(0.5),
                    fiducial_window_s: 0.05,
                },
            },
            ppg: PpgConfig {
                bandpass: BandConfig {
                    low_hz: 0.5,
                    high_hz: 5.0,
                    order: 2,
                },
                polarity: PpgPolarity::Inverted,
                detection: DetectionConfig {
                    min_distance_s: 0.4,
                    height: HeightRule::FractionOfMax(0.5),
                    fiducial_window_s: 0.3,
                },
            },
            pcg: PcgConfig {
                bandpass: BandConfig {
                    low_hz: 20.0,
                    high_hz: 400.0,
                    order: 2,
                },
                notch: Some(MAINS_NOTCH),
            },
            spo2: SpO2Calibration::default(),
        }
    }

    /// Recorded captures whose optical channels were stored negated
    pub fn offline() -> Self {
        let mut config = Self::realtime();
        config.name = "Offline analysis".to_string();
        config.profile = ProcessingProfile::Offline;

        config.ecg.detection.height = HeightRule::FractionOfMax(0.6);
        config.ppg.bandpass.low_hz = 0.1;
        config.ppg.polarity = PpgPolarity::PreInverted;
        config.ppg.detection.min_distance_s = 0.5;
        config.ppg.detection.height = HeightRule::WindowMean;
        config.spo2 = SpO2Calibration {
            a: 110.0,
            b: 25.0,
            min_percent: 0.0,
            max_percent: 100.0,
            noise_floor: 0.0,
        };
        config
    }

    /// Create configuration suitable for given profile
    pub fn for_profile(profile: ProcessingProfile) -> Self {
        match profile {
            ProcessingProfile::RealTime => Self::realtime(),
            ProcessingProfile::Offline => Self::offline(),
            ProcessingProfile::Custom => Self::realtime(),
        }
    }

    /// Minimum analysable window in samples
    pub fn min_analysis_samples(&self) -> usize {
        (self.min_analysis_seconds * self.sample_rate_hz).ceil().max(0.0) as usize
    }

    /// Validate entire configuration
    pub fn validate(&self) -> VsmResult<()> {
        if !(self.sample_rate_hz > 0.0) || !self.sample_rate_hz.is_finite() {
            return Err(config_error!("sample rate must be positive, got {}", self.sample_rate_hz));
        }

        if !(self.min_analysis_seconds >= 0.0) {
            return Err(config_error!(
                "minimum analysis length must not be negative, got {}",
                self.min_analysis_seconds
            ));
        }

        validate_detection("ecg", &self.ecg.detection)?;
        validate_detection("ppg", &self.ppg.detection)?;

        let spo2 = &self.spo2;
        if !spo2.a.is_finite() || !spo2.b.is_finite() {
            return Err(config_error!("SpO2 calibration coefficients must be finite"));
        }
        if !(spo2.min_percent < spo2.max_percent) {
            return Err(config_error!(
                "SpO2 clamp range [{}, {}] is empty",
                spo2.min_percent,
                spo2.max_percent
            ));
        }
        if !(spo2.noise_floor >= 0.0) {
            return Err(config_error!("SpO2 noise floor must not be negative"));
        }

        // Band edges, orders and notch parameters are checked by the filter design
        FilterBank::new(self).map(|_| ())
    }

    /// Export configuration to JSON
    pub fn to_json(&self) -> VsmResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| VsmError::Serialization {
            reason: format!("Failed to serialize configuration: {}", e),
        })
    }

    /// Import configuration from JSON
    pub fn from_json(json: &str) -> VsmResult<Self> {
        serde_json::from_str(json).map_err(|e| VsmError::Serialization {
            reason: format!("Failed to deserialize configuration: {}", e),
        })
    }

    /// Read and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> VsmResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| config_error!("cannot read {}: {}", path.display(), e))?;
        let config = Self::from_json(&json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self::realtime()
    }
}

fn validate_detection(channel: &str, detection: &DetectionConfig) -> VsmResult<()> {
    if !(detection.min_distance_s > 0.0) {
        return Err(config_error!("{} minimum peak distance must be positive", channel));
    }
    if !(detection.fiducial_window_s >= 0.0) {
        return Err(config_error!("{} fiducial window must not be negative", channel));
    }
    if let HeightRule::FractionOfMax(fraction) = detection.height {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(config_error!(
                "{} height fraction must be in (0, 1], got {}",
                channel,
                fraction
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for profile in [
            ProcessingProfile::RealTime,
            ProcessingProfile::Offline,
            ProcessingProfile::Custom,
        ] {
            let config = ProcessingConfig::for_profile(profile);
            assert!(config.validate().is_ok(), "{} invalid", config.name);
        }
    }

    #[test]
    fn test_min_analysis_samples() {
        let config = ProcessingConfig::default();
        assert_eq!(config.min_analysis_samples(), 2000);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = ProcessingConfig::default();
        config.sample_rate_hz = 0.0;
        assert!(config.validate().is_err());

        let mut config = ProcessingConfig::default();
        config.ecg.bandpass.high_hz = 600.0; // above Nyquist
        assert!(matches!(
            config.validate(),
            Err(VsmError::InvalidFilter { .. })
        ));

        let mut config = ProcessingConfig::default();
        config.spo2.min_percent = 100.0;
        assert!(config.validate().is_err());

        let mut config = ProcessingConfig::default();
        config.ppg.detection.height = HeightRule::FractionOfMax(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = ProcessingConfig::offline();
        let json = config.to_json().unwrap();
        assert!(json.contains("WindowMean"));
        assert_eq!(ProcessingConfig::from_json(&json).unwrap(), config);
        assert!(ProcessingConfig::from_json("{").is_err());
    }

    #[test]
    fn test_polarity_flags() {
        assert!(PpgPolarity::Inverted.negate());
        assert!(!PpgPolarity::PreInverted.negate());
        assert!(PpgPolarity::PreInverted.dc_from_magnitude());
        assert!(!PpgPolarity::Upright.dc_from_magnitude());
    }
}
