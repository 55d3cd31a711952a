//! Fixed-capacity sample history
//!
//! [`RingBuffer`] keeps the most recent samples of one channel and
//! [`ChannelBuffers`] keeps one ring per acquisition channel, pushed together
//! so that every ring always holds the same samples.
//!
//! Neither type locks internally. The coordinator wraps [`ChannelBuffers`] in
//! a mutex; a reader copies what it needs with [`ChannelBuffers::snapshot`]
//! and releases the lock before doing any work on the copy.

use crate::error::{VsmError, VsmResult};
use crate::sample::{Channel, Sample};
use std::collections::VecDeque;

/// Fixed-capacity FIFO that overwrites its oldest entry when full
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    data: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// Create an empty buffer holding at most `capacity` entries
    pub fn new(capacity: usize) -> VsmResult<Self> {
        if capacity == 0 {
            return Err(VsmError::InvalidConfig {
                reason: "ring buffer capacity must be greater than 0".to_string(),
            });
        }

        Ok(RingBuffer {
            data: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Append a value, dropping the oldest one if the buffer is full
    pub fn push(&mut self, value: T) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(value);
    }

    /// Copy of the last `min(n, len())` values, oldest first
    pub fn snapshot(&self, n: usize) -> Vec<T> {
        let take = n.min(self.data.len());
        self.data.iter().skip(self.data.len() - take).cloned().collect()
    }

    /// Number of values currently held
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer holds nothing
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Maximum number of values held
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Per-channel windows copied out of [`ChannelBuffers`] in one go
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelWindows {
    pub pcg: Vec<f64>,
    pub red: Vec<f64>,
    pub ir: Vec<f64>,
    pub ecg: Vec<f64>,
}

impl ChannelWindows {
    /// Window for one channel
    pub fn get(&self, channel: Channel) -> &[f64] {
        match channel {
            Channel::Pcg => &self.pcg,
            Channel::Red => &self.red,
            Channel::Ir => &self.ir,
            Channel::Ecg => &self.ecg,
        }
    }

    /// Number of samples per channel
    pub fn len(&self) -> usize {
        self.ecg.len()
    }

    /// Check if no samples were copied
    pub fn is_empty(&self) -> bool {
        self.ecg.is_empty()
    }

    /// The trailing `n` samples of every channel
    pub fn tail(&self, n: usize) -> ChannelWindows {
        let cut = |v: &Vec<f64>| v[v.len() - n.min(v.len())..].to_vec();
        ChannelWindows {
            pcg: cut(&self.pcg),
            red: cut(&self.red),
            ir: cut(&self.ir),
            ecg: cut(&self.ecg),
        }
    }
}

/// One ring buffer per acquisition channel
#[derive(Debug, Clone)]
pub struct ChannelBuffers {
    rings: [RingBuffer<i32>; 4],
    total_pushed: u64,
}

impl ChannelBuffers {
    /// Create buffers holding `capacity` samples per channel
    pub fn new(capacity: usize) -> VsmResult<Self> {
        Ok(ChannelBuffers {
            rings: [
                RingBuffer::new(capacity)?,
                RingBuffer::new(capacity)?,
                RingBuffer::new(capacity)?,
                RingBuffer::new(capacity)?,
            ],
            total_pushed: 0,
        })
    }

    /// Push one sample into every channel
    pub fn push(&mut self, sample: &Sample) {
        for channel in Channel::ALL {
            self.rings[channel.index()].push(sample.value(channel));
        }
        self.total_pushed += 1;
    }

    /// Ring for one channel
    pub fn channel(&self, channel: Channel) -> &RingBuffer<i32> {
        &self.rings[channel.index()]
    }

    /// Samples currently held per channel
    pub fn len(&self) -> usize {
        self.rings[0].len()
    }

    /// Check if nothing has been pushed yet
    pub fn is_empty(&self) -> bool {
        self.rings[0].is_empty()
    }

    /// Samples pushed since creation, including overwritten ones
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    /// Copy the last `min(n, len())` samples of one channel as `f64`
    pub fn window(&self, channel: Channel, n: usize) -> Vec<f64> {
        let ring = self.channel(channel);
        let take = n.min(ring.len());
        ring.data
            .iter()
            .skip(ring.len() - take)
            .map(|&v| f64::from(v))
            .collect()
    }

    /// Copy the last `min(n, len())` samples of all channels
    pub fn snapshot(&self, n: usize) -> ChannelWindows {
        ChannelWindows {
            pcg: self.window(Channel::Pcg, n),
            red: self.window(Channel::Red, n),
            ir: self.window(Channel::Ir, n),
            ecg: self.window(Channel::Ecg, n),
        }
    }
}
