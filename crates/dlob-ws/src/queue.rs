//! Bounded inbound frame queue.
//!
//! Frames are buffered between receipt and processing. When the queue is
//! full the oldest frame is dropped and a backpressure event is produced.

use crate::events::BackpressureEvent;
use std::collections::VecDeque;

/// FIFO of raw text frames with drop-oldest overflow.
#[derive(Debug)]
pub struct MessageQueue {
    capacity: usize,
    frames: VecDeque<String>,
    /// Cumulative drops; survives `clear()`.
    dropped_total: u64,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity),
            dropped_total: 0,
        }
    }

    /// Enqueue a frame, returning a backpressure event if one was dropped.
    pub fn push(&mut self, frame: String) -> Option<BackpressureEvent> {
        let dropped = self.frames.len() >= self.capacity;
        if dropped {
            self.frames.pop_front();
            self.dropped_total += 1;
        }
        self.frames.push_back(frame);

        dropped.then(|| BackpressureEvent {
            queue_depth: self.frames.len(),
            dropped_messages: self.dropped_total,
        })
    }

    pub fn pop(&mut self) -> Option<String> {
        self.frames.pop_front()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
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

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }
}
