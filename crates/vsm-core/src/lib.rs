//! VSM-Core: Foundation types for the vital-signs monitor
//!
//! Wire samples, per-channel history and the published snapshot type.

pub mod error;
pub mod ring_buffer;
pub mod sample;
pub mod vitals;

pub use error::{VsmError, VsmResult};
pub use ring_buffer::{ChannelBuffers, ChannelWindows, RingBuffer};
pub use sample::{parse_bytes, parse_line, Channel, Sample, TimestampUnit};
pub use vitals::{finite, VitalsSnapshot};
