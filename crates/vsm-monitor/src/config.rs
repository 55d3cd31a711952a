//! Monitor session configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use vsm_core::{config_error, TimestampUnit, VsmError, VsmResult};
use vsm_processing::ProcessingConfig;

/// Everything a [`crate::Coordinator`] needs to run one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Filtering, detection and calibration
    pub processing: ProcessingConfig,
    /// Raw history kept per channel (seconds)
    pub history_seconds: f64,
    /// Window the vitals are computed over (seconds)
    pub analysis_seconds: f64,
    /// Window of the filtered display traces (seconds)
    pub display_seconds: f64,
    /// Compute cadence
    pub compute_interval_ms: u64,
    /// Time allowed for the first valid line to arrive
    pub connect_timeout_ms: u64,
    /// Upper bound on a single blocking read
    pub read_timeout_ms: u64,
    /// Unit of the 5-field schema timestamp for this source
    pub timestamp_unit: TimestampUnit,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            processing: ProcessingConfig::default(),
            history_seconds: 10.0,
            analysis_seconds: 3.0,
            display_seconds: 5.0,
            compute_interval_ms: 1000,
            connect_timeout_ms: 5000,
            read_timeout_ms: 200,
            timestamp_unit: TimestampUnit::Unspecified,
        }
    }
}

impl MonitorConfig {
    fn samples(&self, seconds: f64) -> usize {
        (seconds * self.processing.sample_rate_hz).round().max(0.0) as usize
    }

    /// Ring buffer capacity per channel
    pub fn history_capacity(&self) -> usize {
        self.samples(self.history_seconds)
    }

    pub fn analysis_samples(&self) -> usize {
        self.samples(self.analysis_seconds)
    }

    pub fn display_samples(&self) -> usize {
        self.samples(self.display_seconds)
    }

    pub fn compute_interval(&self) -> Duration {
        Duration::from_millis(self.compute_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Validate entire configuration
    pub fn validate(&self) -> VsmResult<()> {
        self.processing.validate()?;

        if self.analysis_samples() == 0 {
            return Err(config_error!("analysis window must hold at least one sample"));
        }
        if self.display_seconds < self.analysis_seconds {
            return Err(config_error!(
                "display window ({}s) must cover the analysis window ({}s)",
                self.display_seconds,
                self.analysis_seconds
            ));
        }
        if self.history_seconds < self.display_seconds {
            return Err(config_error!(
                "history ({}s) must cover the display window ({}s)",
                self.history_seconds,
                self.display_seconds
            ));
        }
        if self.compute_interval_ms == 0
            || self.read_timeout_ms == 0
            || self.connect_timeout_ms == 0
        {
            return Err(config_error!("intervals and timeouts must be greater than 0"));
        }
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_windows() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.history_capacity(), 10_000);
        assert_eq!(config.analysis_samples(), 3000);
        assert_eq!(config.display_samples(), 5000);
        assert_eq!(config.read_timeout(), Duration::from_millis(200));
    }

    #[test]
    fn test_window_ordering_enforced() {
        let mut config = MonitorConfig::default();
        config.analysis_seconds = 6.0;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.history_seconds = 4.0;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.read_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut config = MonitorConfig::default();
        config.timestamp_unit = TimestampUnit::Microseconds;
        config.compute_interval_ms = 250;

        let name = format!("vsm-monitor-config-{}.json", std::process::id());
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, config.to_json().unwrap()).unwrap();
        let loaded = MonitorConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, config);
        assert!(MonitorConfig::load("/nonexistent/monitor.json").is_err());
    }
}
