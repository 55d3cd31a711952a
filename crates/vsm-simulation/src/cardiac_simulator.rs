//! Multi-channel cardiac signal simulator
//!
//! Produces the same integer samples a bedside acquisition board would emit:
//! ECG around a mid-scale baseline, reflective PPG whose values fall on each
//! pulse, and a heart-sound channel, all beat-synchronous.

use crate::waveforms::{ecg_complex, pcg_sounds, ppg_pulse, RhythmPattern};
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use vsm_core::{config_error, Sample, VsmResult};

/// Configuration for cardiac simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardiacConfig {
    /// Sampling rate in Hz
    pub sample_rate_hz: f64,
    /// Heart rhythm to generate
    pub rhythm: RhythmPattern,
    /// Optical channel levels
    pub optical: OpticalConfig,
    /// ECG baseline (ADC counts)
    pub ecg_baseline: f64,
    /// ECG gain (counts per millivolt)
    pub ecg_gain: f64,
    /// Heart-sound amplitude (counts)
    pub pcg_amplitude: f64,
    /// Noise configuration
    pub noise: NoiseConfig,
    /// Power line interference (50/60Hz) on ECG and PCG
    pub powerline_freq: Option<f64>,
    /// Emit the 5-field schema with a microsecond counter
    pub include_timestamp: bool,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
}

/// Red/IR levels chosen so the ratio-of-ratios matches a target saturation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpticalConfig {
    /// Saturation the optical channels should encode (%)
    pub spo2_percent: f64,
    /// Calibration intercept used to encode it
    pub calibration_a: f64,
    /// Calibration slope used to encode it
    pub calibration_b: f64,
    /// Red DC level (counts)
    pub red_dc: f64,
    /// IR DC level (counts)
    pub ir_dc: f64,
    /// IR pulsatile fraction of DC
    pub perfusion_index: f64,
}

impl OpticalConfig {
    /// Ratio-of-ratios that decodes to `spo2_percent`
    pub fn ratio(&self) -> f64 {
        (self.calibration_a - self.spo2_percent) / self.calibration_b
    }

    /// Pulsatile amplitudes (red, ir) in counts
    pub fn amplitudes(&self) -> (f64, f64) {
        let ir_ac = self.ir_dc * self.perfusion_index;
        let red_ac = self.red_dc * self.perfusion_index * self.ratio();
        (red_ac, ir_ac)
    }
}

impl Default for OpticalConfig {
    fn default() -> Self {
        Self {
            spo2_percent: 97.0,
            calibration_a: 104.0,
            calibration_b: 17.0,
            red_dc: 90_000.0,
            ir_dc: 100_000.0,
            perfusion_index: 0.02,
        }
    }
}

/// Noise configuration for realistic simulation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Gaussian noise standard deviation (counts, 0.0 = no noise)
    pub gaussian_std: f64,
    /// Baseline wander amplitude (counts)
    pub baseline_wander: f64,
    /// Motion artifact probability per sample (0.0 to 1.0)
    pub motion_artifact_prob: f64,
    /// Motion artifact amplitude (counts)
    pub motion_artifact_amp: f64,
}

impl NoiseConfig {
    /// No noise at all
    pub fn none() -> Self {
        Self {
            gaussian_std: 0.0,
            baseline_wander: 0.0,
            motion_artifact_prob: 0.0,
            motion_artifact_amp: 0.0,
        }
    }
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            gaussian_std: 4.0,
            baseline_wander: 30.0,
            motion_artifact_prob: 0.0005,
            motion_artifact_amp: 150.0,
        }
    }
}

impl Default for CardiacConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 1000.0,
            rhythm: RhythmPattern::Variable {
                bpm: 72.0,
                sdnn_ms: 30.0,
            },
            optical: OpticalConfig::default(),
            ecg_baseline: 2048.0,
            ecg_gain: 600.0,
            pcg_amplitude: 800.0,
            noise: NoiseConfig::default(),
            powerline_freq: Some(50.0),
            include_timestamp: true,
            seed: None,
        }
    }
}

impl CardiacConfig {
    /// Noise-free, fixed-rate configuration for deterministic tests
    pub fn clean(bpm: f64) -> Self {
        Self {
            rhythm: RhythmPattern::Regular { bpm },
            noise: NoiseConfig::none(),
            powerline_freq: None,
            seed: Some(0),
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> VsmResult<()> {
        if !(self.sample_rate_hz > 0.0) {
            return Err(config_error!("simulator sample rate must be positive"));
        }
        if !(self.rhythm.bpm_at(0.0) > 0.0) {
            return Err(config_error!("simulated heart rate must be positive"));
        }
        let optical = &self.optical;
        if !(optical.calibration_b > 0.0) || !(optical.ratio() > 0.0) {
            return Err(config_error!(
                "target SpO2 {}% cannot be encoded with a={} b={}",
                optical.spo2_percent,
                optical.calibration_a,
                optical.calibration_b
            ));
        }
        if !(optical.perfusion_index > 0.0 && optical.perfusion_index < 0.5) {
            return Err(config_error!("perfusion index must be in (0, 0.5)"));
        }
        if !(self.noise.gaussian_std >= 0.0) {
            return Err(config_error!("noise standard deviation must not be negative"));
        }
        Ok(())
    }
}

/// Cardiac signal simulator
pub struct CardiacSimulator {
    config: CardiacConfig,
    rng: rand::rngs::StdRng,
    normal_dist: Normal<f64>,
    sample_index: u64,
    beat_start: f64,
    previous_beat_start: Option<f64>,
    beat_interval: f64,
}

impl CardiacSimulator {
    /// Create new simulator with configuration
    pub fn new(config: CardiacConfig) -> VsmResult<Self> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_entropy(),
        };
        let normal_dist = Normal::new(0.0, config.noise.gaussian_std)
            .map_err(|e| config_error!("Failed to create normal distribution: {}", e))?;
        let beat_interval = config.rhythm.next_interval(0.0, &mut rng);

        Ok(CardiacSimulator {
            config,
            rng,
            normal_dist,
            sample_index: 0,
            beat_start: 0.0,
            previous_beat_start: None,
            beat_interval,
        })
    }

    /// Time of the next sample in seconds
    pub fn time(&self) -> f64 {
        self.sample_index as f64 / self.config.sample_rate_hz
    }

    /// Generate the next sample
    pub fn next_sample(&mut self) -> Sample {
        let time = self.time();
        self.advance_beat(time);

        // Sum the current and previous beat so long waves overlap cleanly
        let mut ecg_mv = ecg_complex(time - self.beat_start);
        let mut pulse = ppg_pulse(time - self.beat_start);
        let mut sounds = pcg_sounds(time - self.beat_start);
        if let Some(previous) = self.previous_beat_start {
            ecg_mv += ecg_complex(time - previous);
            pulse += ppg_pulse(time - previous);
            sounds += pcg_sounds(time - previous);
        }

        let hum = match self.config.powerline_freq {
            Some(freq) => 20.0 * (2.0 * PI * freq * time).sin(),
            None => 0.0,
        };
        let wander = self.config.noise.baseline_wander * (2.0 * PI * 0.15 * time).sin();

        let ecg = self.config.ecg_baseline
            + self.config.ecg_gain * ecg_mv
            + wander
            + hum
            + self.add_noise();
        let pcg = self.config.pcg_amplitude * sounds + hum + self.add_noise();

        let (red_ac, ir_ac) = self.config.optical.amplitudes();
        let red = self.config.optical.red_dc - red_ac * pulse + wander + self.add_noise();
        let ir = self.config.optical.ir_dc - ir_ac * pulse + wander + self.add_noise();

        let mut sample = Sample::new(to_count(pcg), to_count(red), to_count(ir), to_count(ecg));
        if self.config.include_timestamp {
            let micros = (time * 1_000_000.0).round() as i64;
            sample = sample.with_timestamp(micros);
        }

        self.sample_index += 1;
        sample
    }

    /// Generate `duration_s` worth of samples
    pub fn generate(&mut self, duration_s: f64) -> Vec<Sample> {
        let count = (duration_s * self.config.sample_rate_hz).round().max(0.0) as usize;
        (0..count).map(|_| self.next_sample()).collect()
    }

    /// Generate `duration_s` worth of wire lines (no trailing newline)
    pub fn generate_lines(&mut self, duration_s: f64) -> Vec<String> {
        self.generate(duration_s).iter().map(Sample::to_line).collect()
    }

    fn advance_beat(&mut self, time: f64) {
        while time >= self.beat_start + self.beat_interval {
            self.previous_beat_start = Some(self.beat_start);
            self.beat_start += self.beat_interval;
            self.beat_interval = self.config.rhythm.next_interval(self.beat_start, &mut self.rng);
        }
    }

    /// Gaussian noise plus occasional motion artifacts
    fn add_noise(&mut self) -> f64 {
        let noise = &self.config.noise;
        let mut value = 0.0;
        if noise.gaussian_std > 0.0 {
            value += self.normal_dist.sample(&mut self.rng);
        }
        if noise.motion_artifact_prob > 0.0 && self.rng.gen::<f64>() < noise.motion_artifact_prob {
            value += noise.motion_artifact_amp * self.rng.gen_range(-1.0..1.0);
        }
        value
    }

    /// Get current configuration
    pub fn config(&self) -> &CardiacConfig {
        &self.config
    }

    /// Change rhythm in place; takes effect from the next beat
    pub fn set_rhythm(&mut self, rhythm: RhythmPattern) -> VsmResult<()> {
        let mut config = self.config.clone();
        config.rhythm = rhythm;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Change the encoded saturation
    pub fn set_spo2(&mut self, spo2_percent: f64) -> VsmResult<()> {
        let mut config = self.config.clone();
        config.optical.spo2_percent = spo2_percent;
        config.validate()?;
        self.config = config;
        Ok(())
    }
}

fn to_count(value: f64) -> i32 {
    value.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsm_core::{parse_line, Channel};

    #[test]
    fn test_sample_count_and_timestamps() {
        let mut simulator = CardiacSimulator::new(CardiacConfig::clean(60.0)).unwrap();
        let samples = simulator.generate(1.0);

        assert_eq!(samples.len(), 1000);
        assert_eq!(samples[0].timestamp, Some(0));
        assert_eq!(samples[1].timestamp, Some(1000));
        assert_eq!(samples[999].timestamp, Some(999_000));
    }

    #[test]
    fn test_lines_parse_back() {
        let mut config = CardiacConfig::default();
        config.seed = Some(42);
        config.include_timestamp = false;
        let mut simulator = CardiacSimulator::new(config).unwrap();

        for line in simulator.generate_lines(0.5) {
            let sample = parse_line(&line).unwrap();
            assert_eq!(sample.timestamp, None);
        }
    }

    #[test]
    fn test_r_waves_on_the_beat() {
        let mut simulator = CardiacSimulator::new(CardiacConfig::clean(60.0)).unwrap();
        let samples = simulator.generate(3.0);
        let ecg: Vec<i32> = samples.iter().map(|s| s.value(Channel::Ecg)).collect();

        for beat in 0..3 {
            let start = beat * 1000;
            let window = &ecg[start..start + 1000];
            let peak = window
                .iter()
                .enumerate()
                .max_by_key(|(_, v)| **v)
                .map(|(i, _)| i)
                .unwrap();
            assert!((peak as i64 - 200).abs() <= 1, "beat {} peak at {}", beat, peak);
        }
    }

    #[test]
    fn test_optical_channels_fall_on_pulse() {
        let mut simulator = CardiacSimulator::new(CardiacConfig::clean(60.0)).unwrap();
        let samples = simulator.generate(1.0);
        let ir: Vec<i32> = samples.iter().map(|s| s.ir).collect();

        let trough = ir
            .iter()
            .enumerate()
            .min_by_key(|(_, v)| **v)
            .map(|(i, _)| i)
            .unwrap();
        assert!((trough as i64 - 450).abs() <= 2);
        assert!(ir[0] > ir[trough]);
    }

    #[test]
    fn test_encoded_ratio() {
        let optical = OpticalConfig::default();
        let (red_ac, ir_ac) = optical.amplitudes();
        let ratio = (red_ac / optical.red_dc) / (ir_ac / optical.ir_dc);
        assert!((ratio - optical.ratio()).abs() < 1e-12);
        assert!((optical.calibration_a - optical.calibration_b * ratio - 97.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = CardiacConfig::clean(60.0);
        config.optical.spo2_percent = 110.0;
        assert!(CardiacSimulator::new(config).is_err());

        let mut simulator = CardiacSimulator::new(CardiacConfig::clean(60.0)).unwrap();
        assert!(simulator.set_rhythm(RhythmPattern::Regular { bpm: 0.0 }).is_err());
        assert!(simulator.set_spo2(95.0).is_ok());
    }

    #[test]
    fn test_pipeline_recovers_simulated_vitals() {
        use vsm_core::ChannelBuffers;
        use vsm_processing::{ProcessingConfig, VitalsPipeline};

        let mut simulator = CardiacSimulator::new(CardiacConfig::clean(75.0)).unwrap();
        let mut buffers = ChannelBuffers::new(5000).unwrap();
        for sample in simulator.generate(5.0) {
            buffers.push(&sample);
        }

        let pipeline = VitalsPipeline::new(ProcessingConfig::default()).unwrap();
        let frame = pipeline.analyze(&buffers.snapshot(5000), 3000, 5000);

        let bpm = frame.snapshot.bpm.unwrap();
        assert!((bpm - 75.0).abs() < 1.0, "bpm {}", bpm);
        let spo2 = frame.snapshot.spo2.unwrap();
        assert!((spo2 - 97.0).abs() < 1.0, "spo2 {}", spo2);
        assert!(frame.snapshot.crest_time_ms.is_some());
    }
}
