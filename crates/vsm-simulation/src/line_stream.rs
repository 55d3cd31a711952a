//! Simulated serial device: writes wire lines into an async byte pipe
//!
//! The read half of the pipe behaves like the transport a real acquisition
//! board would provide, so the monitor can be exercised end to end without
//! hardware. Dropping or stopping the stream closes the pipe (EOF).

use crate::cardiac_simulator::{CardiacConfig, CardiacSimulator};
use crate::waveforms::RhythmPattern;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use vsm_core::{config_error, VsmResult};

/// How fast lines are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pacing {
    /// One chunk per chunk duration of wall-clock time
    RealTime,
    /// As fast as the reader drains the pipe
    Unpaced,
}

/// Configuration for the simulated line stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Cardiac simulation configuration
    pub simulator: CardiacConfig,
    /// Chunk duration in seconds (e.g., 0.05 for 50ms chunks)
    pub chunk_duration: f64,
    /// Pacing of chunks
    pub pacing: Pacing,
    /// Stop after this much simulated time (seconds)
    pub duration: Option<f64>,
    /// Start producing immediately instead of waiting for `Start`
    pub autostart: bool,
    /// Pipe buffer size in bytes
    pub pipe_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            simulator: CardiacConfig::default(),
            chunk_duration: 0.05,
            pacing: Pacing::RealTime,
            duration: None,
            autostart: true,
            pipe_capacity: 64 * 1024,
        }
    }
}

/// Commands for controlling the stream
#[derive(Debug, Clone)]
pub enum StreamCommand {
    Start,
    Stop,
    Pause,
    Resume,
    SetRhythm(RhythmPattern),
    SetSpO2(f64),
    /// Write one raw line (newline appended) between chunks
    InjectLine(String),
}

/// Stream statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub chunks_generated: u64,
    pub samples_written: u64,
    pub lines_injected: u64,
    pub simulated_seconds: f64,
}

/// Simulated device writing lines at the configured rate
pub struct SimulatedLineStream {
    config: StreamConfig,
    simulator: CardiacSimulator,
    control_receiver: mpsc::Receiver<StreamCommand>,
    control_sender: mpsc::Sender<StreamCommand>,
    running: bool,
    stats: StreamStats,
}

impl SimulatedLineStream {
    /// Create new simulated stream
    pub fn new(config: StreamConfig) -> VsmResult<Self> {
        if !(config.chunk_duration > 0.0) {
            return Err(config_error!("chunk duration must be positive"));
        }
        let simulator = CardiacSimulator::new(config.simulator.clone())?;
        let (control_sender, control_receiver) = mpsc::channel(32);

        Ok(SimulatedLineStream {
            running: config.autostart,
            config,
            simulator,
            control_receiver,
            control_sender,
            stats: StreamStats::default(),
        })
    }

    /// Get control sender for sending commands
    pub fn control_handle(&self) -> mpsc::Sender<StreamCommand> {
        self.control_sender.clone()
    }

    /// Current statistics
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Produce lines into `writer` until stopped, the configured duration
    /// elapses, or the reader goes away
    pub async fn run<W: AsyncWrite + Unpin>(&mut self, mut writer: W) -> VsmResult<StreamStats> {
        let chunk = Duration::from_secs_f64(self.config.chunk_duration);
        let mut ticker = interval(match self.config.pacing {
            Pacing::RealTime => chunk,
            Pacing::Unpaced => Duration::from_micros(1),
        });
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        info!(
            rhythm = self.config.simulator.rhythm.description(),
            chunk_ms = (self.config.chunk_duration * 1000.0) as u64,
            "Simulated stream started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick(), if self.running => {
                    if self.finished() {
                        break;
                    }
                    let started = Instant::now();
                    let mut text = String::new();
                    for line in self.simulator.generate_lines(self.config.chunk_duration) {
                        text.push_str(&line);
                        text.push('\n');
                        self.stats.samples_written += 1;
                    }
                    if !self.write(&mut writer, &text).await {
                        break;
                    }
                    self.stats.chunks_generated += 1;
                    self.stats.simulated_seconds += self.config.chunk_duration;

                    if self.config.pacing == Pacing::RealTime && started.elapsed() > chunk {
                        warn!(
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Chunk generation slower than real time"
                        );
                    }
                }

                command = self.control_receiver.recv() => {
                    match command {
                        Some(StreamCommand::Start) | Some(StreamCommand::Resume) => {
                            self.running = true;
                            debug!("Simulated stream running");
                        }
                        Some(StreamCommand::Pause) => {
                            self.running = false;
                            debug!("Simulated stream paused");
                        }
                        Some(StreamCommand::Stop) | None => break,
                        Some(StreamCommand::SetRhythm(rhythm)) => {
                            if let Err(e) = self.simulator.set_rhythm(rhythm) {
                                warn!(error = %e, "Rhythm change rejected");
                            }
                        }
                        Some(StreamCommand::SetSpO2(spo2)) => {
                            if let Err(e) = self.simulator.set_spo2(spo2) {
                                warn!(error = %e, "SpO2 change rejected");
                            }
                        }
                        Some(StreamCommand::InjectLine(line)) => {
                            if !self.write(&mut writer, &format!("{}\n", line)).await {
                                break;
                            }
                            self.stats.lines_injected += 1;
                        }
                    }
                }
            }
        }

        // Closing the writer is what signals EOF to the reader
        let _ = writer.shutdown().await;
        info!(
            samples = self.stats.samples_written,
            seconds = self.stats.simulated_seconds,
            "Simulated stream stopped"
        );
        Ok(self.stats.clone())
    }

    fn finished(&self) -> bool {
        match self.config.duration {
            Some(limit) => self.stats.simulated_seconds + 1e-9 >= limit,
            None => false,
        }
    }

    /// Write, reporting `false` once the reader has gone away
    async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W, text: &str) -> bool {
        match writer.write_all(text.as_bytes()).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Reader closed, ending simulated stream");
                false
            }
        }
    }
}

/// Helper function to create a stream and run it in the background.
///
/// Returns the read half of the pipe and the control handle.
pub fn start_line_stream(
    config: StreamConfig,
) -> VsmResult<(DuplexStream, mpsc::Sender<StreamCommand>)> {
    let (writer, reader) = tokio::io::duplex(config.pipe_capacity.max(1));
    let mut stream = SimulatedLineStream::new(config)?;
    let control = stream.control_handle();

    tokio::spawn(async move {
        if let Err(e) = stream.run(writer).await {
            warn!(error = %e, "Simulated stream failed");
        }
    });

    Ok((reader, control))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use vsm_core::parse_line;

    fn unpaced(duration: f64) -> StreamConfig {
        StreamConfig {
            simulator: CardiacConfig::clean(60.0),
            pacing: Pacing::Unpaced,
            duration: Some(duration),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stream_writes_expected_lines() {
        let (reader, _control) = start_line_stream(unpaced(0.5)).unwrap();
        let mut lines = BufReader::new(reader).lines();

        let mut count = 0;
        while let Some(line) = lines.next_line().await.unwrap() {
            parse_line(&line).unwrap();
            count += 1;
        }
        assert_eq!(count, 500);
    }

    #[tokio::test]
    async fn test_injected_line_arrives() {
        let mut config = unpaced(0.2);
        config.autostart = false;
        let (reader, control) = start_line_stream(config).unwrap();

        control.send(StreamCommand::InjectLine("x,y".to_string())).await.unwrap();
        control.send(StreamCommand::Start).await.unwrap();

        let mut lines = BufReader::new(reader).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        assert_eq!(first, "x,y");

        let mut rest = 0;
        while let Some(line) = lines.next_line().await.unwrap() {
            assert!(parse_line(&line).is_ok());
            rest += 1;
        }
        assert_eq!(rest, 200);
    }

    #[tokio::test]
    async fn test_stop_closes_pipe() {
        let mut config = unpaced(1000.0);
        config.pacing = Pacing::RealTime;
        let (reader, control) = start_line_stream(config).unwrap();

        control.send(StreamCommand::Stop).await.unwrap();

        let mut lines = BufReader::new(reader).lines();
        let outcome = tokio::time::timeout(Duration::from_secs(5), async {
            while lines.next_line().await.unwrap().is_some() {}
        })
        .await;
        assert!(outcome.is_ok(), "pipe should reach EOF after Stop");
    }

    #[test]
    fn test_zero_chunk_rejected() {
        let config = StreamConfig {
            chunk_duration: 0.0,
            ..Default::default()
        };
        assert!(SimulatedLineStream::new(config).is_err());
    }
}
