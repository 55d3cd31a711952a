//! Filter → detect → compute chain for one compute cycle

use crate::config::ProcessingConfig;
use crate::filters::FilterBank;
use crate::peaks::{PeakDetector, PeakSet};
use crate::vitals::{VitalsEngine, VitalsInput};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::trace;
use vsm_core::{Channel, ChannelWindows, VitalsSnapshot, VsmResult};

/// Filtered display traces, one per channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilteredTraces {
    pub pcg: Vec<f64>,
    pub red: Vec<f64>,
    pub ir: Vec<f64>,
    pub ecg: Vec<f64>,
}

impl FilteredTraces {
    pub fn get(&self, channel: Channel) -> &[f64] {
        match channel {
            Channel::Pcg => &self.pcg,
            Channel::Red => &self.red,
            Channel::Ir => &self.ir,
            Channel::Ecg => &self.ecg,
        }
    }
}

/// Everything one compute cycle publishes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFrame {
    /// Derived metrics
    pub snapshot: VitalsSnapshot,
    /// ECG beats, indices relative to the analysis window
    pub beats: PeakSet,
    /// PPG pulses from the IR channel, indices relative to the analysis window
    pub pulses: PeakSet,
    /// Samples in the analysis window
    pub analysis_len: usize,
    /// Filtered traces over the display window
    pub display: FilteredTraces,
    /// Start of the analysis window inside the display traces
    pub analysis_offset: usize,
}

impl AnalysisFrame {
    /// Frame with no metrics, markers or traces
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Per-cycle processing chain built once from configuration
#[derive(Debug, Clone)]
pub struct VitalsPipeline {
    config: ProcessingConfig,
    bank: FilterBank,
    ecg_detector: PeakDetector,
    ppg_detector: PeakDetector,
    engine: VitalsEngine,
}

impl VitalsPipeline {
    /// Validate the configuration and design every filter
    pub fn new(config: ProcessingConfig) -> VsmResult<Self> {
        config.validate()?;
        let fs = config.sample_rate_hz;

        Ok(VitalsPipeline {
            bank: FilterBank::new(&config)?,
            ecg_detector: PeakDetector::new(&config.ecg.detection, fs),
            ppg_detector: PeakDetector::new(&config.ppg.detection, fs),
            engine: VitalsEngine::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Orient and filter one channel's window.
    ///
    /// Optical channels are negated first when the configured polarity says
    /// pulses arrive pointing down.
    pub fn filter(&self, channel: Channel, window: &[f64]) -> Vec<f64> {
        if channel.is_ppg() && self.config.ppg.polarity.negate() {
            let negated: Vec<f64> = window.iter().map(|x| -x).collect();
            self.bank.filter_channel(channel, &negated)
        } else {
            self.bank.filter_channel(channel, window)
        }
    }

    /// Run one full cycle over `windows`.
    ///
    /// Metrics and markers use the trailing `analysis_len` samples; display
    /// traces use the trailing `display_len` samples.
    pub fn analyze(
        &self,
        windows: &ChannelWindows,
        analysis_len: usize,
        display_len: usize,
    ) -> AnalysisFrame {
        let started = Instant::now();
        let analysis = windows.tail(analysis_len);

        let ecg = self.filter(Channel::Ecg, &analysis.ecg);
        let beats = self.ecg_detector.detect_beats(&ecg);

        let ir = self.filter(Channel::Ir, &analysis.ir);
        let pulses = self.ppg_detector.detect_pulses(&ir);
        let detected = started.elapsed();

        let snapshot = self.engine.compute(&VitalsInput {
            beats: &beats,
            pulses: &pulses,
            red: &analysis.red,
            ir: &analysis.ir,
            window_len: analysis.len(),
        });

        let display = windows.tail(display_len);
        let traces = FilteredTraces {
            pcg: self.filter(Channel::Pcg, &display.pcg),
            red: self.filter(Channel::Red, &display.red),
            ir: self.filter(Channel::Ir, &display.ir),
            ecg: self.filter(Channel::Ecg, &display.ecg),
        };

        trace!(
            detect_us = detected.as_micros() as u64,
            total_us = started.elapsed().as_micros() as u64,
            beats = beats.len(),
            pulses = pulses.len(),
            "Analysis cycle timings"
        );

        AnalysisFrame {
            snapshot,
            beats,
            pulses,
            analysis_len: analysis.len(),
            analysis_offset: display.len().saturating_sub(analysis.len()),
            display: traces,
        }
    }
}
