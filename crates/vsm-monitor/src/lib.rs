//! VSM-Monitor: live vital-signs session coordination
//!
//! A [`Coordinator`] takes decoded lines from any transport, keeps the raw
//! history, recomputes vitals on a fixed cadence and publishes the latest
//! [`AnalysisFrame`] for display and logging collaborators.

pub mod config;
pub mod coordinator;
pub mod transport;

pub use config::MonitorConfig;
pub use coordinator::{Coordinator, CoordinatorState, IngestOutcome, IngestStats, StopReason};
pub use transport::{open_replay, paced_lines, stdin_source, LineSource};
pub use vsm_processing::AnalysisFrame;
