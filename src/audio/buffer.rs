//! Jitter buffer for received audio frames
//!
//! A bounded FIFO: frames are played in arrival order, never reordered.
//! When full, the oldest frame is dropped to admit a new one, so memory
//! and added latency stay bounded at the cost of completeness.

use std::collections::VecDeque;

use crate::constants::{CHANNELS, JITTER_HEADROOM};

/// Audio frame containing interleaved stereo samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / CHANNELS as usize
    }

    /// Get frame duration in microseconds
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.samples_per_channel() as u64 * 1_000_000) / sample_rate as u64
    }
}

/// Bounded arrival-order jitter buffer with prebuffer gating
pub struct JitterBuffer {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
    prebuffer: usize,
    received: u64,
    evicted: u64,
    released: u64,
}

impl JitterBuffer {
    /// Create a buffer holding up to `prebuffer + 50` frames
    pub fn new(prebuffer: usize) -> Self {
        let capacity = prebuffer + JITTER_HEADROOM;
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            prebuffer,
            received: 0,
            evicted: 0,
            released: 0,
        }
    }

    /// Append a frame, returning the frame evicted to make room, if any
    pub fn push(&mut self, frame: AudioFrame) -> Option<AudioFrame> {
        let evicted = if self.frames.len() >= self.capacity {
            self.evicted += 1;
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        self.received += 1;
        evicted
    }

    /// Take the oldest frame once occupancy exceeds the prebuffer depth
    pub fn pop_ready(&mut self) -> Option<AudioFrame> {
        if self.frames.len() <= self.prebuffer {
            return None;
        }
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.released += 1;
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn prebuffer(&self) -> usize {
        self.prebuffer
    }

    /// Get statistics
    pub fn stats(&self) -> JitterBufferStats {
        JitterBufferStats {
            level: self.frames.len(),
            capacity: self.capacity,
            received: self.received,
            evicted: self.evicted,
            released: self.released,
        }
    }
}

/// Jitter buffer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitterBufferStats {
    pub level: usize,
    pub capacity: usize,
    pub received: u64,
    pub evicted: u64,
    pub released: u64,
}

impl JitterBufferStats {
    /// Fraction of received frames dropped by eviction
    pub fn eviction_rate(&self) -> f32 {
        if self.received == 0 {
            0.0
        } else {
            self.evicted as f32 / self.received as f32
        }
    }
}
