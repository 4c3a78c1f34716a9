// src/recording/ring_buffer.rs
//
// Fixed-capacity window of the most recent frames. Entries are shared
// (`Arc`) so a recording session can keep frames alive after the buffer has
// evicted them; reading never mutates the buffer.

use crate::types::Frame;
use std::collections::VecDeque;
use std::sync::Arc;

pub type SharedFrame = Arc<Frame>;

pub struct RingBuffer {
    entries: VecDeque<SharedFrame>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// `ceil(seconds * fps)`, at least one frame.
    pub fn capacity_for(seconds: f64, frame_rate: f64) -> usize {
        ((seconds * frame_rate).ceil().max(1.0)) as usize
    }

    pub fn push(&mut self, frame: Frame) -> SharedFrame {
        let shared = Arc::new(frame);
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Arc::clone(&shared));
        shared
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn oldest_index(&self) -> Option<u64> {
        self.entries.front().map(|f| f.index)
    }

    pub fn newest(&self) -> Option<&SharedFrame> {
        self.entries.back()
    }

    /// Retained frames with `index >= start`, oldest first.
    pub fn since(&self, start: u64) -> Vec<SharedFrame> {
        self.entries
            .iter()
            .filter(|f| f.index >= start)
            .cloned()
            .collect()
    }
}
