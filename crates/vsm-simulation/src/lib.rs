//! VSM-Simulation: synthetic cardiac acquisition source
//!
//! Beat-synchronous ECG, PPG and PCG generation for demos and end-to-end
//! tests, plus an async line stream that stands in for the serial device.

pub mod cardiac_simulator;
pub mod line_stream;
pub mod waveforms;

pub use cardiac_simulator::*;
pub use line_stream::*;
pub use waveforms::*;
