//! Session coordinator: ingestion, periodic compute and publication
//!
//! The coordinator owns the per-channel history. Two roles use it:
//!
//! - ingestion pushes parsed samples under a short mutex hold and never
//!   waits on anything else;
//! - compute copies the windows it needs under the same mutex, releases it,
//!   then filters and analyses the copy.
//!
//! Results are published through a `watch` channel holding the latest
//! [`AnalysisFrame`]; readers always see a complete frame, possibly a stale
//! one, and never block either role.
//!
//! State machine: `Disconnected → Connecting → Streaming → Stopped`.
//! `Connecting` falls back to `Disconnected` when no valid line arrives in
//! time. `Stopped` is terminal.

use crate::config::MonitorConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;
use vsm_core::{
    parse_bytes, parse_line, Channel, ChannelBuffers, TimestampUnit, VitalsSnapshot, VsmError,
    VsmResult,
};
use vsm_processing::{AnalysisFrame, VitalsPipeline};

/// Longest accepted line, terminator excluded
const MAX_LINE_BYTES: usize = 256;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// [`Coordinator::stop`] was called
    Requested,
    /// The transport reached end of stream
    TransportClosed,
    /// The transport reported an error
    TransportError,
}

/// Coordinator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorState {
    Disconnected,
    Connecting,
    Streaming,
    Stopped(StopReason),
}

impl CoordinatorState {
    pub fn name(&self) -> &'static str {
        match self {
            CoordinatorState::Disconnected => "disconnected",
            CoordinatorState::Connecting => "connecting",
            CoordinatorState::Streaming => "streaming",
            CoordinatorState::Stopped(_) => "stopped",
        }
    }

    /// Whether ingestion/compute for this session are over for good
    pub fn is_stopped(&self) -> bool {
        matches!(self, CoordinatorState::Stopped(_))
    }

    fn is_active(&self) -> bool {
        matches!(self, CoordinatorState::Connecting | CoordinatorState::Streaming)
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorState::Stopped(reason) => write!(f, "stopped ({:?})", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// What happened to one ingested line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Parsed and pushed into every channel
    Accepted,
    /// Wrong field count, bad token or bad encoding; counted and dropped
    Malformed,
    /// Empty or whitespace-only; not counted
    Blank,
    /// The session is stopped; nothing was recorded
    Ignored,
}

/// Ingestion and compute counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestStats {
    pub accepted_lines: u64,
    pub malformed_lines: u64,
    /// Timestamp of the newest 5-field sample
    pub last_timestamp: Option<i64>,
    pub timestamp_unit: TimestampUnit,
    pub compute_cycles: u64,
    pub buffered_samples: usize,
}

struct History {
    buffers: ChannelBuffers,
    last_timestamp: Option<i64>,
}

struct Shared {
    config: MonitorConfig,
    pipeline: VitalsPipeline,
    session_id: Uuid,
    history: Mutex<History>,
    accepted: AtomicU64,
    malformed: AtomicU64,
    malformed_reported: AtomicU64,
    cycles: AtomicU64,
    /// `total_pushed` of the history behind the published frame
    published_through: AtomicU64,
    state_tx: watch::Sender<CoordinatorState>,
    frame_tx: watch::Sender<Arc<AnalysisFrame>>,
    stop_tx: watch::Sender<bool>,
}

/// Handle to one monitoring session; clones share the same session
#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("session_id", &self.shared.session_id)
            .field("state", &self.state())
            .finish()
    }
}

impl Coordinator {
    /// Validate the configuration, design the filters and allocate history
    pub fn new(config: MonitorConfig) -> VsmResult<Self> {
        config.validate()?;
        let pipeline = VitalsPipeline::new(config.processing.clone())?;
        let buffers = ChannelBuffers::new(config.history_capacity())?;

        let (state_tx, _) = watch::channel(CoordinatorState::Disconnected);
        let (frame_tx, _) = watch::channel(Arc::new(AnalysisFrame::empty()));
        let (stop_tx, _) = watch::channel(false);

        Ok(Coordinator {
            shared: Arc::new(Shared {
                config,
                pipeline,
                session_id: Uuid::new_v4(),
                history: Mutex::new(History {
                    buffers,
                    last_timestamp: None,
                }),
                accepted: AtomicU64::new(0),
                malformed: AtomicU64::new(0),
                malformed_reported: AtomicU64::new(0),
                cycles: AtomicU64::new(0),
                published_through: AtomicU64::new(0),
                state_tx,
                frame_tx,
                stop_tx,
            }),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    pub fn session_id(&self) -> Uuid {
        self.shared.session_id
    }

    pub fn state(&self) -> CoordinatorState {
        *self.shared.state_tx.borrow()
    }

    /// Receiver notified on every state change
    pub fn subscribe_state(&self) -> watch::Receiver<CoordinatorState> {
        self.shared.state_tx.subscribe()
    }

    /// Receiver notified whenever a compute cycle publishes a frame
    pub fn subscribe_frames(&self) -> watch::Receiver<Arc<AnalysisFrame>> {
        self.shared.frame_tx.subscribe()
    }

    /// Move the state along one edge if the current state allows it
    fn transition(
        &self,
        allowed: impl Fn(&CoordinatorState) -> bool,
        next: CoordinatorState,
    ) -> bool {
        let mut previous = None;
        let changed = self.shared.state_tx.send_if_modified(|state| {
            if allowed(state) && *state != next {
                previous = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });
        if let Some(from) = previous {
            info!(from = %from, to = %next, "State transition");
        }
        changed
    }

    /// Begin waiting for data: `Disconnected → Connecting`
    pub fn connect(&self) -> VsmResult<()> {
        if self.transition(|s| *s == CoordinatorState::Disconnected, CoordinatorState::Connecting) {
            Ok(())
        } else {
            Err(VsmError::InvalidState {
                state: self.state().name(),
                operation: "connect",
            })
        }
    }

    /// End the session. Safe to call from any task, any number of times.
    pub fn stop(&self) {
        self.transition(|s| !s.is_stopped(), CoordinatorState::Stopped(StopReason::Requested));
        self.shared.stop_tx.send_replace(true);
    }

    /// Feed one decoded line
    pub fn ingest(&self, line: &str) -> IngestOutcome {
        if line.trim().is_empty() {
            return IngestOutcome::Blank;
        }
        if self.state().is_stopped() {
            return IngestOutcome::Ignored;
        }
        match parse_line(line) {
            Ok(sample) => self.record(&sample),
            Err(e) => self.reject(e),
        }
    }

    /// Feed one raw line as received from a byte transport
    pub fn ingest_bytes(&self, bytes: &[u8]) -> IngestOutcome {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return IngestOutcome::Blank;
        }
        if self.state().is_stopped() {
            return IngestOutcome::Ignored;
        }
        match parse_bytes(bytes) {
            Ok(sample) => self.record(&sample),
            Err(e) => self.reject(e),
        }
    }

    fn record(&self, sample: &vsm_core::Sample) -> IngestOutcome {
        {
            let mut history = self.shared.history.lock();
            history.buffers.push(sample);
            if sample.timestamp.is_some() {
                history.last_timestamp = sample.timestamp;
            }
        }
        self.shared.accepted.fetch_add(1, Ordering::Relaxed);

        // First valid line while connecting
        if self.state() == CoordinatorState::Connecting {
            self.transition(|s| *s == CoordinatorState::Connecting, CoordinatorState::Streaming);
        }
        IngestOutcome::Accepted
    }

    fn reject(&self, error: VsmError) -> IngestOutcome {
        let total = self.shared.malformed.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(error = %error, total, "Dropped malformed line");
        IngestOutcome::Malformed
    }

    /// Run one compute cycle now and publish its frame.
    ///
    /// The buffer lock is held only while the windows are copied. A frame
    /// built from older history than the published one is returned but not
    /// published, so overlapping cycles never move readers backwards.
    pub fn compute_cycle(&self) -> Arc<AnalysisFrame> {
        let config = &self.shared.config;
        let analysis_len = config.analysis_samples();
        let display_len = config.display_samples();

        let (windows, through) = {
            let history = self.shared.history.lock();
            let windows = history.buffers.snapshot(analysis_len.max(display_len));
            (windows, history.buffers.total_pushed())
        };

        let frame = Arc::new(self.shared.pipeline.analyze(&windows, analysis_len, display_len));
        let cycle = self.shared.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let published = self.shared.frame_tx.send_if_modified(|current| {
            // Runs under the channel's write lock
            if through < self.shared.published_through.load(Ordering::Relaxed) {
                return false;
            }
            self.shared.published_through.store(through, Ordering::Relaxed);
            *current = Arc::clone(&frame);
            true
        });

        debug!(
            cycle,
            published,
            window = frame.analysis_len,
            beats = frame.beats.len(),
            pulses = frame.pulses.len(),
            "Compute cycle: {}",
            frame.snapshot
        );

        let malformed = self.shared.malformed.load(Ordering::Relaxed);
        let reported = self.shared.malformed_reported.swap(malformed, Ordering::Relaxed);
        if malformed > reported {
            warn!(new = malformed - reported, total = malformed, "Malformed lines dropped");
        }

        frame
    }

    /// Latest published frame (empty before the first cycle)
    pub fn latest_frame(&self) -> Arc<AnalysisFrame> {
        Arc::clone(&self.shared.frame_tx.borrow())
    }

    /// Latest published vitals
    pub fn latest_snapshot(&self) -> VitalsSnapshot {
        self.latest_frame().snapshot.clone()
    }

    /// Latest filtered display trace for one channel
    pub fn latest_filtered(&self, channel: Channel) -> Vec<f64> {
        self.latest_frame().display.get(channel).to_vec()
    }

    /// Last `min(n, buffered)` raw values of one channel, oldest first
    pub fn latest_raw(&self, channel: Channel, n: usize) -> Vec<i32> {
        self.shared.history.lock().buffers.channel(channel).snapshot(n)
    }

    /// Samples currently held per channel
    pub fn buffered_len(&self) -> usize {
        self.shared.history.lock().buffers.len()
    }

    pub fn stats(&self) -> IngestStats {
        let (buffered_samples, last_timestamp) = {
            let history = self.shared.history.lock();
            (history.buffers.len(), history.last_timestamp)
        };
        IngestStats {
            accepted_lines: self.shared.accepted.load(Ordering::Relaxed),
            malformed_lines: self.shared.malformed.load(Ordering::Relaxed),
            last_timestamp,
            timestamp_unit: self.shared.config.timestamp_unit,
            compute_cycles: self.shared.cycles.load(Ordering::Relaxed),
            buffered_samples,
        }
    }

    /// Start the periodic compute role.
    ///
    /// Cycles run only while `Streaming`; the task ends once the session
    /// leaves `Connecting`/`Streaming`. Analysis runs on the blocking pool so
    /// it never stalls ingestion.
    pub fn spawn_compute_task(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let mut state_rx = self.subscribe_state();
        let mut ticker = interval(self.shared.config.compute_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let state = coordinator.state();
                            if !state.is_active() {
                                break;
                            }
                            if state == CoordinatorState::Streaming {
                                coordinator.compute_off_thread().await;
                            }
                        }
                        changed = state_rx.changed() => {
                            let active = state_rx.borrow().is_active();
                            if changed.is_err() || !active {
                                break;
                            }
                        }
                    }
                }
                debug!("Compute task finished");
            }
            .in_current_span(),
        )
    }

    async fn compute_off_thread(&self) {
        let worker = self.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || worker.compute_cycle()).await {
            warn!(error = %e, "Compute cycle aborted");
        }
    }

    /// Drive a whole session from a line-oriented transport.
    ///
    /// Enters `Connecting`, starts the compute role and reads lines until the
    /// transport closes or fails, or [`Coordinator::stop`] is called. Reads are
    /// bounded by the read timeout, so a stop request is noticed promptly
    /// even on a silent transport. When the transport ends, lines received
    /// since the last cycle are analysed before the session stops.
    ///
    /// Returns why the session stopped, or [`VsmError::ConnectTimeout`] when
    /// no valid line arrived in time. Dropping the returned future ends the
    /// session as `Stopped(Requested)` and cancels the compute role.
    pub async fn run<R>(&self, reader: R) -> VsmResult<StopReason>
    where
        R: AsyncBufRead + Unpin,
    {
        let span = info_span!("session", id = %self.shared.session_id);
        self.run_session(reader).instrument(span).await
    }

    async fn run_session<R>(&self, mut reader: R) -> VsmResult<StopReason>
    where
        R: AsyncBufRead + Unpin,
    {
        self.connect()?;
        info!("Session started, waiting for data");

        let compute = ComputeRole {
            coordinator: self.clone(),
            task: Some(self.spawn_compute_task()),
        };
        let outcome = self.ingest_loop(&mut reader).await;

        match &outcome {
            Ok(reason) => {
                if *reason != StopReason::Requested && self.state() == CoordinatorState::Streaming {
                    self.compute_off_thread().await;
                }
                self.transition(|s| !s.is_stopped(), CoordinatorState::Stopped(*reason));
            }
            Err(VsmError::ConnectTimeout { .. }) => {
                self.transition(
                    |s| *s == CoordinatorState::Connecting,
                    CoordinatorState::Disconnected,
                );
            }
            Err(_) => {
                self.transition(
                    |s| !s.is_stopped(),
                    CoordinatorState::Stopped(StopReason::TransportError),
                );
            }
        }

        compute.finish().await;

        let stats = self.stats();
        info!(
            accepted = stats.accepted_lines,
            malformed = stats.malformed_lines,
            cycles = stats.compute_cycles,
            state = %self.state(),
            "Session ended"
        );
        outcome
    }

    async fn ingest_loop<R>(&self, reader: &mut R) -> VsmResult<StopReason>
    where
        R: AsyncBufRead + Unpin,
    {
        let config = &self.shared.config;
        let deadline = Instant::now() + config.connect_timeout();
        let mut stop_rx = self.shared.stop_tx.subscribe();
        // Survives read timeouts so a partially received line is kept
        let mut line = Vec::with_capacity(64);
        // Set while skipping the rest of a line that exceeded MAX_LINE_BYTES
        let mut overlong = false;

        loop {
            if *stop_rx.borrow_and_update() || self.state().is_stopped() {
                return Ok(StopReason::Requested);
            }
            if self.state() == CoordinatorState::Connecting && Instant::now() >= deadline {
                warn!(
                    timeout_ms = config.connect_timeout_ms,
                    "No valid data before connect deadline"
                );
                return Err(VsmError::ConnectTimeout {
                    timeout_ms: config.connect_timeout_ms,
                });
            }

            // line.len() <= MAX_LINE_BYTES here, so the budget is never zero
            let budget = (MAX_LINE_BYTES + 1 - line.len()) as u64;
            let mut bounded = (&mut *reader).take(budget);

            tokio::select! {
                _ = stop_rx.changed() => {}
                read = timeout(config.read_timeout(), bounded.read_until(b'\n', &mut line)) => {
                    match read {
                        Err(_) => {}
                        Ok(Ok(0)) => {
                            if !line.is_empty() && !overlong {
                                self.ingest_bytes(&line);
                            }
                            info!("Transport closed");
                            return Ok(StopReason::TransportClosed);
                        }
                        Ok(Ok(_)) => {
                            if line.last() == Some(&b'\n') {
                                if !overlong {
                                    self.ingest_bytes(&line);
                                }
                                overlong = false;
                                line.clear();
                            } else if line.len() > MAX_LINE_BYTES {
                                if !overlong {
                                    self.reject(VsmError::LineTooLong { limit: MAX_LINE_BYTES });
                                    overlong = true;
                                }
                                line.clear();
                            }
                        }
                        Ok(Err(e)) => {
                            warn!(error = %e, "Transport error");
                            return Ok(StopReason::TransportError);
                        }
                    }
                }
            }
        }
    }
}

/// Compute role of one `run`: joined when the session ends normally,
/// aborted when the session future is dropped
struct ComputeRole {
    coordinator: Coordinator,
    task: Option<JoinHandle<()>>,
}

impl ComputeRole {
    async fn finish(mut self) {
        if let Some(task) = self.task.as_mut() {
            if let Err(e) = task.await {
                warn!(error = %e, "Compute task failed");
            }
            self.task = None;
        }
    }
}

impl Drop for ComputeRole {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let cancelled = self.coordinator.transition(
                |s| s.is_active(),
                CoordinatorState::Stopped(StopReason::Requested),
            );
            if cancelled {
                warn!("Session cancelled before the transport ended");
            }
            self.coordinator.shared.stop_tx.send_replace(true);
        }
    }
}
