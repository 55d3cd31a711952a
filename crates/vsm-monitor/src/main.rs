//! vsm-monitor: run a vital-signs session against a capture, stdin or the
//! built-in simulator and log every published snapshot

use anyhow::{bail, Context};
use chrono::SecondsFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vsm_monitor::{
    open_replay, stdin_source, AnalysisFrame, Coordinator, LineSource, MonitorConfig,
};
use vsm_simulation::{start_line_stream, CardiacConfig, Pacing, RhythmPattern, StreamConfig};

#[derive(Parser, Debug)]
#[command(name = "vsm-monitor", version, about = "Live ECG/PPG vital-signs monitor")]
struct Cli {
    /// JSON monitor configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Pace replayed or simulated data at the sample rate
    #[arg(long, global = true)]
    realtime: bool,

    /// Stop the session after this many seconds
    #[arg(long, global = true)]
    duration: Option<f64>,

    /// Print each snapshot as one JSON object per line on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    source: Source,
}

#[derive(Subcommand, Debug)]
enum Source {
    /// Replay a recorded line file
    Replay { file: PathBuf },
    /// Read lines from standard input
    Stdin,
    /// Run against the synthetic cardiac source
    Simulate {
        /// Simulated heart rate
        #[arg(long, default_value_t = 72.0)]
        bpm: f64,
        /// Simulated oxygen saturation
        #[arg(long, default_value_t = 97.0)]
        spo2: f64,
        /// Beat-to-beat variability (ms)
        #[arg(long, default_value_t = 30.0)]
        sdnn: f64,
        /// Named rhythm preset, overrides --bpm and --sdnn
        #[arg(long)]
        rhythm: Option<String>,
        /// Random seed
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Some(seconds) = cli.duration {
        if !(seconds.is_finite() && seconds > 0.0) {
            bail!("--duration must be a positive number of seconds");
        }
    }

    let config = match &cli.config {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    let sample_rate = config.processing.sample_rate_hz;

    let source: LineSource = match &cli.source {
        Source::Replay { file } => {
            let pace = cli.realtime.then_some(sample_rate);
            open_replay(file, pace)
                .await
                .with_context(|| format!("opening capture {}", file.display()))?
        }
        Source::Stdin => stdin_source(),
        Source::Simulate {
            bpm,
            spo2,
            sdnn,
            rhythm,
            seed,
        } => {
            let mut simulator = CardiacConfig::default();
            simulator.sample_rate_hz = sample_rate;
            simulator.rhythm = match rhythm {
                Some(name) => preset(name)?,
                None => RhythmPattern::Variable {
                    bpm: *bpm,
                    sdnn_ms: *sdnn,
                },
            };
            simulator.optical.spo2_percent = *spo2;
            simulator.optical.calibration_a = config.processing.spo2.a;
            simulator.optical.calibration_b = config.processing.spo2.b;
            simulator.seed = *seed;

            let stream = StreamConfig {
                simulator,
                pacing: if cli.realtime { Pacing::RealTime } else { Pacing::Unpaced },
                duration: cli.duration,
                ..StreamConfig::default()
            };
            let (reader, _control) = start_line_stream(stream).context("starting simulator")?;
            Box::new(tokio::io::BufReader::new(reader))
        }
    };

    let coordinator = Coordinator::new(config).context("building coordinator")?;
    info!(session = %coordinator.session_id(), "Monitor ready");

    let (printer_done, done) = oneshot::channel();
    let printer = tokio::spawn(print_frames(coordinator.subscribe_frames(), done, cli.json));

    if let Some(seconds) = cli.duration {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
            coordinator.stop();
        });
    }

    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted");
                coordinator.stop();
            }
        });
    }

    let result = coordinator.run(source).await;
    // Frames published up to the end of the session are still printed
    let _ = printer_done.send(());
    if let Err(e) = printer.await {
        warn!(error = %e, "Snapshot printer failed");
    }

    let stats = coordinator.stats();
    info!(
        accepted = stats.accepted_lines,
        malformed = stats.malformed_lines,
        cycles = stats.compute_cycles,
        "Final statistics"
    );

    match result {
        Ok(reason) => {
            info!(?reason, "Session stopped");
            Ok(())
        }
        Err(e) => bail!("session ended {}: {}", coordinator.state(), e),
    }
}

fn preset(name: &str) -> anyhow::Result<RhythmPattern> {
    let presets = RhythmPattern::presets();
    if let Some((_, pattern)) = presets.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
        return Ok(*pattern);
    }
    let known: Vec<&str> = presets.iter().map(|(n, _)| *n).collect();
    bail!("unknown rhythm {:?}, expected one of: {}", name, known.join(", "))
}

async fn print_frames(
    mut frames: watch::Receiver<Arc<AnalysisFrame>>,
    mut done: oneshot::Receiver<()>,
    json: bool,
) {
    loop {
        tokio::select! {
            biased;
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = frames.borrow_and_update().clone();
                if let Err(e) = emit(&frame, json) {
                    warn!(error = %e, "Failed to print snapshot");
                }
            }
            _ = &mut done => break,
        }
    }
}

fn emit(frame: &AnalysisFrame, json: bool) -> anyhow::Result<()> {
    let snapshot = &frame.snapshot;
    info!(
        at = %snapshot.computed_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        beats = frame.beats.len(),
        "{}",
        snapshot
    );
    if json {
        println!("{}", serde_json::to_string(snapshot).context("encoding snapshot")?);
    }
    Ok(())
}
