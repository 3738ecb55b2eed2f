//! Outbound audio framing.
//!
//! Turns the capture layer's float blocks (whatever size the device callback
//! produces) into fixed-duration PCM16 frames at the wire rate.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::backend::CaptureEvent;
use super::frame::AudioFrame;
use super::pcm;
use crate::errors::SessionError;

/// Framing parameters
#[derive(Debug, Clone)]
pub struct FramerConfig {
    /// Wire sample rate in Hz
    pub sample_rate: u32,
    /// Duration of each emitted frame
    pub frame_duration_ms: u64,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            sample_rate: super::WIRE_SAMPLE_RATE,
            frame_duration_ms: 100,
        }
    }
}

impl FramerConfig {
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as u64 * self.frame_duration_ms / 1000) as usize
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample_rate must be positive".to_string());
        }
        if !(10..=100).contains(&self.frame_duration_ms) {
            return Err(format!(
                "frame_duration_ms must be within 10..=100, got {}",
                self.frame_duration_ms
            ));
        }
        Ok(())
    }
}

/// Accumulates capture blocks and slices them into frames
pub struct AudioFramer {
    config: FramerConfig,
    samples_per_frame: usize,
    pending: Vec<i16>,
    sequence: u64,
    samples_emitted: u64,
}

impl AudioFramer {
    pub fn new(config: FramerConfig) -> Self {
        let samples_per_frame = config.samples_per_frame().max(1);
        Self {
            config,
            samples_per_frame,
            pending: Vec::with_capacity(samples_per_frame * 2),
            sequence: 0,
            samples_emitted: 0,
        }
    }

    /// Number of frames produced so far
    pub fn frames_emitted(&self) -> u64 {
        self.sequence
    }

    /// Samples waiting for a full frame
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Convert a block of samples and return every frame it completes.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend(samples.iter().map(|&s| pcm::f32_to_i16(s)));

        let mut frames = Vec::new();
        while self.pending.len() >= self.samples_per_frame {
            let rest = self.pending.split_off(self.samples_per_frame);
            let full = std::mem::replace(&mut self.pending, rest);
            frames.push(self.emit(full));
        }
        frames
    }

    /// Emit the trailing partial frame, if any.
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(self.emit(rest))
    }

    fn emit(&mut self, samples: Vec<i16>) -> AudioFrame {
        let timestamp_ms = self.samples_emitted * 1000 / self.config.sample_rate.max(1) as u64;
        self.samples_emitted += samples.len() as u64;

        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let frame = AudioFrame::from_pcm16(bytes, self.config.sample_rate, self.sequence, timestamp_ms);
        self.sequence += 1;
        frame
    }

    /// Drive the framer from a capture channel until it ends, the device is
    /// lost, or `stop` flips to `true`.
    ///
    /// `sink` receives every frame in order. A lost device stops framing and is
    /// returned as [`SessionError::Device`]; no empty frames are produced.
    pub async fn run<F>(
        mut self,
        mut capture: mpsc::Receiver<CaptureEvent>,
        mut stop: watch::Receiver<bool>,
        mut sink: F,
    ) -> Result<u64, SessionError>
    where
        F: FnMut(AudioFrame) + Send,
    {
        info!(
            "Audio framer started ({}Hz, {}ms frames)",
            self.config.sample_rate, self.config.frame_duration_ms
        );

        loop {
            tokio::select! {
                event = capture.recv() => match event {
                    Some(CaptureEvent::Samples(block)) => {
                        for frame in self.push(&block) {
                            sink(frame);
                        }
                    }
                    Some(CaptureEvent::DeviceLost(reason)) => {
                        warn!("Capture device lost: {}", reason);
                        self.pending.clear();
                        return Err(SessionError::Device(reason));
                    }
                    None => {
                        debug!("Capture source ended");
                        break;
                    }
                },
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!("Audio framer stop requested");
                        break;
                    }
                }
            }
        }

        if let Some(frame) = self.flush() {
            sink(frame);
        }

        info!("Audio framer stopped after {} frames", self.sequence);
        Ok(self.sequence)
    }
}
