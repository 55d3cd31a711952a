//! VSM-Processing: filtering, peak detection and vital-sign derivation
//!
//! Every stage works on copied windows and keeps no state between calls.

pub mod config;
pub mod filters;
pub mod peaks;
pub mod pipeline;
pub mod vitals;

pub use config::{
    BandConfig, DetectionConfig, EcgConfig, NotchConfig, PcgConfig, PpgConfig, PpgPolarity,
    ProcessingConfig, ProcessingProfile, SpO2Calibration,
};
pub use filters::{Biquad, FilterBank, FilterKind, FilterSpec};
pub use peaks::{find_peaks, HeightRule, Peak, PeakDetector, PeakSet};
pub use pipeline::{AnalysisFrame, FilteredTraces, VitalsPipeline};
pub use vitals::{percentile, VitalsEngine, VitalsInput};
