//! Inbound speech playback
//!
//! This module provides the `PlaybackScheduler` and the shared handle used by
//! the two flows that touch it:
//! - The transport delivers inbound frames (`enqueue`)
//! - The turn controller flushes on barge-in (`interrupt`)
//! - The pump task (standing in for the audio callback) drives `pump`
//!
//! All three go through one short lock, which makes `interrupt` atomic with
//! respect to frames arriving concurrently.

pub mod clock;
pub mod queue;
pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use clock::{ManualClock, PlaybackClock, RecordingClock, ScheduledRecord, UnitId};
pub use queue::PlaybackQueue;
pub use scheduler::{PlaybackConfig, PlaybackEvent, PlaybackScheduler, PlaybackStats};

use crate::audio::AudioFrame;
use crate::transport::AudioSink;
use crate::turn::{PlaybackControl, TurnEvent};

/// Cloneable handle to a scheduler shared between flows
#[derive(Clone)]
pub struct PlaybackHandle {
    inner: Arc<Mutex<PlaybackScheduler<Box<dyn PlaybackClock>>>>,
}

impl PlaybackHandle {
    pub fn new(config: PlaybackConfig, clock: impl PlaybackClock + 'static) -> Self {
        let clock: Box<dyn PlaybackClock> = Box::new(clock);
        Self {
            inner: Arc::new(Mutex::new(PlaybackScheduler::new(config, clock))),
        }
    }

    pub fn enqueue(&self, frame: AudioFrame) -> usize {
        self.inner.lock().enqueue(frame)
    }

    pub fn pump(&self) -> Vec<PlaybackEvent> {
        self.inner.lock().pump()
    }

    pub fn interrupt(&self) -> usize {
        self.inner.lock().interrupt()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue_len()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().is_playing()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.inner.lock().stats()
    }

    /// Start the pump task.
    ///
    /// Every `interval` it advances the schedule and forwards completion to the
    /// turn controller with `try_send`; it never waits on anything but the
    /// scheduler lock.
    pub fn spawn_pump(
        &self,
        interval: Duration,
        events: mpsc::Sender<TurnEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let handle = self.clone();

        tokio::spawn(async move {
            info!("Playback pump started ({}ms tick)", interval.as_millis());
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for event in handle.pump() {
                            match event {
                                PlaybackEvent::Complete => {
                                    if events.try_send(TurnEvent::PlaybackComplete).is_err() {
                                        warn!("Turn controller busy, playback completion dropped");
                                    }
                                }
                                PlaybackEvent::DriftReset { lag } => {
                                    debug!("Playback schedule reset after {}ms lag", lag.as_millis());
                                }
                            }
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Playback pump stopped");
        })
    }
}

impl AudioSink for PlaybackHandle {
    fn deliver(&self, frame: AudioFrame) {
        self.enqueue(frame);
    }
}

impl PlaybackControl for PlaybackHandle {
    fn flush(&self) -> usize {
        self.interrupt()
    }
}
