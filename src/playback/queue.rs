use std::collections::VecDeque;

use crate::audio::AudioFrame;

/// Bounded FIFO of inbound frames waiting to be scheduled
///
/// On overflow the oldest frames are discarded: stale speech is worse than a
/// short skip forward.
#[derive(Debug)]
pub struct PlaybackQueue {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
}

impl PlaybackQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, returning how many old frames were evicted
    pub fn push(&mut self, frame: AudioFrame) -> usize {
        let mut dropped = 0;
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
            dropped += 1;
        }
        self.frames.push_back(frame);
        dropped
    }

    pub fn pop(&mut self) -> Option<AudioFrame> {
        self.frames.pop_front()
    }

    /// Discard everything, returning how many frames were dropped
    pub fn clear(&mut self) -> usize {
        let cleared = self.frames.len();
        self.frames.clear();
        cleared
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
}
