//! Playback clocks
//!
//! The scheduler never touches audio hardware directly. It asks a
//! [`PlaybackClock`] for the output position and hands it units to start at a
//! given time, which keeps the timing logic testable with [`ManualClock`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::audio::WavRecorder;

/// Identifier of one scheduled render unit
pub type UnitId = u64;

/// Monotonic output clock that can start sample buffers at a given time
pub trait PlaybackClock: Send {
    /// Current position of the output clock
    fn now(&self) -> Duration;

    /// Start `samples` at `at` on the output clock
    fn schedule_at(&mut self, id: UnitId, samples: Vec<f32>, at: Duration);

    /// Stop a unit immediately, whether it started yet or not
    fn stop(&mut self, id: UnitId);

    /// Give self-rendering clocks a chance to make progress
    fn render(&mut self) {}
}

impl PlaybackClock for Box<dyn PlaybackClock> {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn schedule_at(&mut self, id: UnitId, samples: Vec<f32>, at: Duration) {
        (**self).schedule_at(id, samples, at)
    }

    fn stop(&mut self, id: UnitId) {
        (**self).stop(id)
    }

    fn render(&mut self) {
        (**self).render()
    }
}

/// A clock the caller keeps a handle to, e.g. to finish a recording after
/// the session let go of it
impl<C: PlaybackClock> PlaybackClock for Arc<Mutex<C>> {
    fn now(&self) -> Duration {
        self.lock().now()
    }

    fn schedule_at(&mut self, id: UnitId, samples: Vec<f32>, at: Duration) {
        self.lock().schedule_at(id, samples, at)
    }

    fn stop(&mut self, id: UnitId) {
        self.lock().stop(id)
    }

    fn render(&mut self) {
        self.lock().render()
    }
}

/// What a [`ManualClock`] knows about a scheduled unit
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledRecord {
    pub at: Duration,
    pub samples: usize,
    pub stopped: bool,
}

#[derive(Debug, Default)]
struct ManualState {
    now: Duration,
    units: BTreeMap<UnitId, ScheduledRecord>,
}

/// Hand-driven clock for tests and offline rendering
///
/// Clones share state, so a test can keep one copy to advance time while the
/// scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.inner.lock().now += by;
    }

    pub fn set(&self, to: Duration) {
        self.inner.lock().now = to;
    }

    /// Every unit ever scheduled, in id order
    pub fn scheduled(&self) -> Vec<(UnitId, ScheduledRecord)> {
        self.inner
            .lock()
            .units
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect()
    }

    /// Units that were not stopped before their start time
    pub fn audible_units(&self) -> usize {
        let state = self.inner.lock();
        state
            .units
            .values()
            .filter(|u| !u.stopped && u.at <= state.now)
            .count()
    }
}

impl PlaybackClock for ManualClock {
    fn now(&self) -> Duration {
        self.inner.lock().now
    }

    fn schedule_at(&mut self, id: UnitId, samples: Vec<f32>, at: Duration) {
        self.inner.lock().units.insert(
            id,
            ScheduledRecord {
                at,
                samples: samples.len(),
                stopped: false,
            },
        );
    }

    fn stop(&mut self, id: UnitId) {
        if let Some(unit) = self.inner.lock().units.get_mut(&id) {
            unit.stopped = true;
        }
    }
}

struct PendingUnit {
    start_sample: u64,
    samples: Vec<f32>,
}

/// Wall-clock output that records what would reach the speaker into a WAV file
///
/// Each `render` call writes everything between the last written position
/// and `now`, mixing in scheduled units and padding gaps with silence. A
/// stopped unit is cut at the current position.
pub struct RecordingClock {
    origin: Instant,
    sample_rate: u32,
    recorder: Option<WavRecorder>,
    units: BTreeMap<UnitId, PendingUnit>,
    cursor: u64,
}

impl RecordingClock {
    pub fn new(recorder: WavRecorder, sample_rate: u32) -> Self {
        Self {
            origin: Instant::now(),
            sample_rate,
            recorder: Some(recorder),
            units: BTreeMap::new(),
            cursor: 0,
        }
    }

    fn sample_at(&self, at: Duration) -> u64 {
        (at.as_nanos() * self.sample_rate as u128 / 1_000_000_000) as u64
    }

    fn write_until(&mut self, target: u64) {
        if target <= self.cursor {
            return;
        }

        let len = (target - self.cursor) as usize;
        let mut block = vec![0.0f32; len];
        for unit in self.units.values() {
            let unit_end = unit.start_sample + unit.samples.len() as u64;
            if unit_end <= self.cursor || unit.start_sample >= target {
                continue;
            }
            let from = unit.start_sample.max(self.cursor);
            let to = unit_end.min(target);
            for pos in from..to {
                block[(pos - self.cursor) as usize] += unit.samples[(pos - unit.start_sample) as usize];
            }
        }

        if let Some(recorder) = &mut self.recorder {
            if let Err(e) = recorder.write(&block) {
                warn!("Disabling playback recording: {:#}", e);
                self.recorder = None;
            }
        }

        self.cursor = target;
        let cursor = self.cursor;
        self.units
            .retain(|_, u| u.start_sample + u.samples.len() as u64 > cursor);
    }

    /// Flush everything still scheduled and close the WAV file
    pub fn finish(&mut self) -> anyhow::Result<u64> {
        let end = self
            .units
            .values()
            .map(|u| u.start_sample + u.samples.len() as u64)
            .max()
            .unwrap_or(self.cursor);
        self.write_until(end);
        match self.recorder.take() {
            Some(recorder) => recorder.finish(),
            None => Ok(0),
        }
    }
}

impl PlaybackClock for RecordingClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn schedule_at(&mut self, id: UnitId, samples: Vec<f32>, at: Duration) {
        let start_sample = self.sample_at(at).max(self.cursor);
        self.units.insert(id, PendingUnit { start_sample, samples });
    }

    fn stop(&mut self, id: UnitId) {
        let target = self.sample_at(self.now());
        self.write_until(target);
        self.units.remove(&id);
    }

    fn render(&mut self) {
        let target = self.sample_at(self.now());
        self.write_until(target);
    }
}
