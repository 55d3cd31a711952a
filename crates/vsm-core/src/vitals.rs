//! Published vital-sign values

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Keep a computed value only if it is a real number.
///
/// Every metric passes through here before it is stored, so NaN and
/// infinities never reach a snapshot.
pub fn finite(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

/// One immutable set of derived metrics.
///
/// `None` means the metric could not be derived from the analysed window
/// (too few beats, flat optical channel, ...). It is never conflated with a
/// reading of zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsSnapshot {
    /// Heart rate in beats per minute
    pub bpm: Option<f64>,
    /// Oxygen saturation estimate in percent
    pub spo2: Option<f64>,
    /// Standard deviation of beat-to-beat intervals in milliseconds
    pub hrv_sdnn_ms: Option<f64>,
    /// Mean Q-to-R interval in milliseconds
    pub qr_interval_ms: Option<f64>,
    /// Mean PPG foot-to-systolic-peak time in milliseconds
    pub crest_time_ms: Option<f64>,
    /// Wall-clock time the snapshot was computed
    pub computed_at: DateTime<Utc>,
}

impl VitalsSnapshot {
    /// Snapshot with every metric absent
    pub fn empty() -> Self {
        Self::empty_at(Utc::now())
    }

    /// Snapshot with every metric absent, stamped at `computed_at`
    pub fn empty_at(computed_at: DateTime<Utc>) -> Self {
        VitalsSnapshot {
            bpm: None,
            spo2: None,
            hrv_sdnn_ms: None,
            qr_interval_ms: None,
            crest_time_ms: None,
            computed_at,
        }
    }

    /// Check if no metric could be derived
    pub fn is_empty(&self) -> bool {
        self.bpm.is_none()
            && self.spo2.is_none()
            && self.hrv_sdnn_ms.is_none()
            && self.qr_interval_ms.is_none()
            && self.crest_time_ms.is_none()
    }
}

impl Default for VitalsSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

struct Shown(Option<f64>, usize);

impl fmt::Display for Shown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{:.*}", self.1, v),
            None => f.write_str("--"),
        }
    }
}

impl fmt::Display for VitalsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BPM: {} | SpO2: {}% | SDNN: {}ms | QR: {}ms | Crest: {}ms",
            Shown(self.bpm, 1),
            Shown(self.spo2, 1),
            Shown(self.hrv_sdnn_ms, 1),
            Shown(self.qr_interval_ms, 1),
            Shown(self.crest_time_ms, 1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finite_guard() {
        assert_eq!(finite(72.5), Some(72.5));
        assert_eq!(finite(0.0), Some(0.0));
        assert_eq!(finite(f64::NAN), None);
        assert_eq!(finite(f64::INFINITY), None);
        assert_eq!(finite(f64::NEG_INFINITY), None);
    }

    #[test]
    fn test_empty_snapshot_display() {
        let snapshot = VitalsSnapshot::empty();
        assert!(snapshot.is_empty());
        assert_eq!(
            snapshot.to_string(),
            "BPM: -- | SpO2: --% | SDNN: --ms | QR: --ms | Crest: --ms"
        );
    }

    #[test]
    fn test_absent_serializes_as_null() {
        let mut snapshot = VitalsSnapshot::empty();
        snapshot.bpm = Some(61.0);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["bpm"], 61.0);
        assert!(json["spo2"].is_null());
        assert!(!snapshot.is_empty());
    }
}
