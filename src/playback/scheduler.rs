//! Gap-free scheduling of synthesized speech.
//!
//! Frames arrive in order and are pulled from a bounded queue only while less
//! than `lookahead` is scheduled ahead of the output clock, so an interruption
//! always has little to cancel and a lot to simply drop.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::clock::{PlaybackClock, UnitId};
use super::queue::PlaybackQueue;
use crate::audio::{AudioFrame, WIRE_SAMPLE_RATE};

/// Playback tuning
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Sample rate of inbound frames
    pub sample_rate: u32,
    /// Maximum frames waiting in the queue
    pub capacity: usize,
    /// Frames shorter than this are merged with the next queued frame
    pub min_unit: Duration,
    /// Upper bound on frames merged into one unit
    pub max_accumulated_frames: usize,
    /// Lag behind the plan beyond which the schedule restarts
    pub drift_threshold: Duration,
    /// Head start given to a restarted schedule
    pub reset_epsilon: Duration,
    /// How far ahead of the output clock units are scheduled
    pub lookahead: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: WIRE_SAMPLE_RATE,
            capacity: 50,
            min_unit: Duration::from_millis(20),
            max_accumulated_frames: 2,
            drift_threshold: Duration::from_millis(100),
            reset_epsilon: Duration::from_millis(10),
            lookahead: Duration::from_millis(200),
        }
    }
}

/// Things the pump reports back to the control flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Queue drained and nothing is playing
    Complete,
    /// The schedule fell too far behind and was restarted
    DriftReset { lag: Duration },
}

/// Playback counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub frames_enqueued: u64,
    pub frames_dropped: u64,
    pub units_scheduled: u64,
    pub interruptions: u64,
    pub drift_resets: u64,
}

#[derive(Debug, Clone, Copy)]
struct ScheduledUnit {
    id: UnitId,
    start: Duration,
    end: Duration,
}

/// Owns the playback queue and the schedule
pub struct PlaybackScheduler<C: PlaybackClock> {
    config: PlaybackConfig,
    clock: C,
    queue: PlaybackQueue,
    scheduled: VecDeque<ScheduledUnit>,
    next_start: Option<Duration>,
    next_id: UnitId,
    completion_pending: bool,
    stats: PlaybackStats,
}

impl<C: PlaybackClock> PlaybackScheduler<C> {
    pub fn new(config: PlaybackConfig, clock: C) -> Self {
        info!(
            "Playback scheduler initialized: {}Hz, queue {} frames, lookahead {}ms",
            config.sample_rate,
            config.capacity,
            config.lookahead.as_millis()
        );

        Self {
            queue: PlaybackQueue::new(config.capacity),
            config,
            clock,
            scheduled: VecDeque::new(),
            next_start: None,
            next_id: 0,
            completion_pending: false,
            stats: PlaybackStats::default(),
        }
    }

    /// Queue an inbound frame; returns the number of old frames evicted
    pub fn enqueue(&mut self, frame: AudioFrame) -> usize {
        if frame.is_empty() {
            return 0;
        }

        let dropped = self.queue.push(frame);
        self.stats.frames_enqueued += 1;
        if dropped > 0 {
            self.stats.frames_dropped += dropped as u64;
            warn!("Playback queue full, dropped {} oldest frame(s)", dropped);
        }
        self.completion_pending = true;
        dropped
    }

    /// Advance the schedule: retire finished units, schedule queued frames up
    /// to the lookahead, and report completion.
    pub fn pump(&mut self) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();

        self.clock.render();
        let now = self.clock.now();

        while let Some(unit) = self.scheduled.front() {
            if unit.end > now {
                break;
            }
            self.scheduled.pop_front();
        }

        while self.scheduled_ahead(now) < self.config.lookahead {
            let Some(samples) = self.take_unit() else {
                break;
            };
            self.schedule(samples, now, &mut events);
        }

        if self.queue.is_empty() && self.scheduled.is_empty() {
            // Idle between turns is not drift; the next turn starts at `now`
            self.next_start = None;
            if self.completion_pending {
                self.completion_pending = false;
                debug!("Playback complete");
                events.push(PlaybackEvent::Complete);
            }
        }

        events
    }

    /// Stop everything immediately: scheduled units, queued frames and the
    /// schedule clock. Returns queued frames discarded plus units stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.scheduled.len();
        for unit in self.scheduled.drain(..) {
            self.clock.stop(unit.id);
        }
        let cleared = self.queue.clear();

        self.next_start = None;
        self.completion_pending = false;
        self.stats.interruptions += 1;

        if stopped + cleared > 0 {
            info!(
                "Playback interrupted: stopped {} unit(s), cleared {} queued frame(s)",
                stopped, cleared
            );
        }
        stopped + cleared
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether any unit is scheduled or sounding
    pub fn is_playing(&self) -> bool {
        !self.scheduled.is_empty()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Give the clock back, e.g. to finalize a recording
    pub fn into_clock(self) -> C {
        self.clock
    }

    fn scheduled_ahead(&self, now: Duration) -> Duration {
        self.next_start
            .map(|t| t.saturating_sub(now))
            .unwrap_or(Duration::ZERO)
    }

    fn min_unit_samples(&self) -> usize {
        (self.config.sample_rate as u128 * self.config.min_unit.as_millis() / 1000) as usize
    }

    /// Pop the next render unit, merging short frames that are already queued.
    fn take_unit(&mut self) -> Option<Vec<f32>> {
        let first = self.queue.pop()?;
        let mut samples = first.to_f32();
        let mut merged = 1;

        while samples.len() < self.min_unit_samples()
            && merged < self.config.max_accumulated_frames
        {
            match self.queue.pop() {
                Some(next) => {
                    samples.extend(next.to_f32());
                    merged += 1;
                }
                None => break,
            }
        }

        Some(samples)
    }

    fn schedule(&mut self, samples: Vec<f32>, now: Duration, events: &mut Vec<PlaybackEvent>) {
        let start = match self.next_start {
            None => now,
            Some(planned) if now > planned + self.config.drift_threshold => {
                let lag = now - planned;
                self.stats.drift_resets += 1;
                warn!("Playback drifted {}ms behind, restarting schedule", lag.as_millis());
                events.push(PlaybackEvent::DriftReset { lag });
                now + self.config.reset_epsilon
            }
            Some(planned) => planned.max(now),
        };

        let duration = Duration::from_nanos(
            samples.len() as u64 * 1_000_000_000 / self.config.sample_rate.max(1) as u64,
        );
        let id = self.next_id;
        self.next_id += 1;

        self.clock.schedule_at(id, samples, start);
        self.scheduled.push_back(ScheduledUnit {
            id,
            start,
            end: start + duration,
        });
        self.next_start = Some(start + duration);
        self.stats.units_scheduled += 1;
    }
}

impl<C: PlaybackClock> std::fmt::Debug for PlaybackScheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("queue_len", &self.queue.len())
            .field("scheduled", &self.scheduled.len())
            .field("playing_since", &self.scheduled.front().map(|u| u.start))
            .field("next_start", &self.next_start)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::clock::ManualClock;

    const RATE: u32 = 24_000;

    fn frame_ms(sequence: u64, ms: u64) -> AudioFrame {
        let samples = (RATE as u64 * ms / 1000) as usize;
        AudioFrame::from_pcm16(vec![0x10; samples * 2], RATE, sequence, 0)
    }

    fn scheduler(clock: &ManualClock) -> PlaybackScheduler<ManualClock> {
        PlaybackScheduler::new(PlaybackConfig::default(), clock.clone())
    }

    #[test]
    fn test_units_are_back_to_back() {
        let clock = ManualClock::new();
        let mut playback = scheduler(&clock);
        for i in 0..3 {
            playback.enqueue(frame_ms(i, 50));
        }

        playback.pump();

        let starts: Vec<Duration> = clock.scheduled().iter().map(|(_, u)| u.at).collect();
        assert_eq!(
            starts,
            vec![
                Duration::ZERO,
                Duration::from_millis(50),
                Duration::from_millis(100)
            ]
        );
    }

    #[test]
    fn test_lookahead_keeps_frames_queued() {
        let clock = ManualClock::new();
        let mut playback = scheduler(&clock);
        for i in 0..10 {
            playback.enqueue(frame_ms(i, 100));
        }

        playback.pump();

        assert_eq!(clock.scheduled().len(), 2);
        assert_eq!(playback.queue_len(), 8);

        clock.advance(Duration::from_millis(100));
        playback.pump();
        assert_eq!(clock.scheduled().len(), 3);
        assert_eq!(clock.scheduled()[2].1.at, Duration::from_millis(200));
    }

    #[test]
    fn test_short_frames_are_merged() {
        let clock = ManualClock::new();
        let mut playback = scheduler(&clock);
        for i in 0..3 {
            playback.enqueue(frame_ms(i, 5));
        }

        playback.pump();

        let units = clock.scheduled();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].1.samples, 240);
        assert_eq!(units[1].1.samples, 120);
        assert_eq!(units[1].1.at, Duration::from_millis(10));
    }

    #[test]
    fn test_small_lag_continues_schedule() {
        let clock = ManualClock::new();
        let mut playback = scheduler(&clock);
        playback.enqueue(frame_ms(0, 50));
        playback.pump();

        clock.set(Duration::from_millis(80));
        playback.enqueue(frame_ms(1, 50));
        let events = playback.pump();

        assert!(events.iter().all(|e| !matches!(e, PlaybackEvent::DriftReset { .. })));
        assert_eq!(clock.scheduled()[1].1.at, Duration::from_millis(80));
    }

    #[test]
    fn test_large_lag_resets_schedule() {
        let clock = ManualClock::new();
        let mut playback = scheduler(&clock);
        playback.enqueue(frame_ms(0, 50));
        playback.pump();

        clock.set(Duration::from_millis(400));
        playback.enqueue(frame_ms(1, 50));
        let events = playback.pump();

        assert!(events.contains(&PlaybackEvent::DriftReset {
            lag: Duration::from_millis(350)
        }));
        assert_eq!(clock.scheduled()[1].1.at, Duration::from_millis(410));
        assert_eq!(playback.stats().drift_resets, 1);
    }

    #[test]
    fn test_next_turn_after_idle_starts_now() {
        let clock = ManualClock::new();
        let mut playback = scheduler(&clock);
        playback.enqueue(frame_ms(0, 50));
        playback.pump();
        clock.advance(Duration::from_millis(50));
        assert_eq!(playback.pump(), vec![PlaybackEvent::Complete]);

        clock.advance(Duration::from_secs(5));
        playback.enqueue(frame_ms(1, 50));
        let events = playback.pump();

        assert!(events.is_empty());
        assert_eq!(playback.stats().drift_resets, 0);
        assert_eq!(
            clock.scheduled()[1].1.at,
            Duration::from_millis(5_050)
        );
    }

    #[test]
    fn test_debug_shows_current_unit_start() {
        let clock = ManualClock::new();
        let mut playback = scheduler(&clock);
        clock.set(Duration::from_millis(250));
        playback.enqueue(frame_ms(0, 50));
        playback.pump();

        let rendered = format!("{:?}", playback);
        assert!(rendered.contains("playing_since: Some(250ms)"));
    }

    #[test]
    fn test_interrupt_before_playback_renders_nothing() {
        let clock = ManualClock::new();
        let mut playback = scheduler(&clock);
        clock.set(Duration::from_secs(1));
        for i in 0..10 {
            playback.enqueue(frame_ms(i, 100));
        }
        assert_eq!(playback.queue_len(), 10);

        playback.interrupt();

        assert_eq!(playback.queue_len(), 0);
        assert!(!playback.is_playing());
        clock.advance(Duration::from_secs(5));
        playback.pump();
        assert_eq!(clock.audible_units(), 0);
    }

    #[test]
    fn test_interrupt_stops_scheduled_units() {
        let clock = ManualClock::new();
        let mut playback = scheduler(&clock);
        for i in 0..10 {
            playback.enqueue(frame_ms(i, 100));
        }
        playback.pump();
        assert!(playback.is_playing());

        let removed = playback.interrupt();

        assert_eq!(removed, 10);
        assert_eq!(playback.queue_len(), 0);
        assert!(!playback.is_playing());
        assert!(clock.scheduled().iter().all(|(_, u)| u.stopped));
    }

    #[test]
    fn test_frames_after_interrupt_are_kept() {
        let clock = ManualClock::new();
        let mut playback = scheduler(&clock);
        playback.enqueue(frame_ms(0, 100));
        playback.pump();
        clock.set(Duration::from_millis(30));

        playback.interrupt();
        playback.enqueue(frame_ms(1, 100));
        playback.pump();

        assert_eq!(clock.scheduled().len(), 2);
        assert_eq!(clock.scheduled()[1].1.at, Duration::from_millis(30));
    }

    #[test]
    fn test_completion_reported_once() {
        let clock = ManualClock::new();
        let mut playback = scheduler(&clock);
        playback.enqueue(frame_ms(0, 50));

        assert!(!playback.pump().contains(&PlaybackEvent::Complete));
        clock.advance(Duration::from_millis(50));
        assert!(playback.pump().contains(&PlaybackEvent::Complete));
        clock.advance(Duration::from_millis(50));
        assert!(playback.pump().is_empty());
    }

    #[test]
    fn test_no_completion_after_interrupt() {
        let clock = ManualClock::new();
        let mut playback = scheduler(&clock);
        playback.enqueue(frame_ms(0, 50));
        playback.pump();

        playback.interrupt();
        clock.advance(Duration::from_millis(100));

        assert!(playback.pump().is_empty());
    }

    #[test]
    fn test_overflow_counts_drops() {
        let clock = ManualClock::new();
        let mut playback = PlaybackScheduler::new(
            PlaybackConfig {
                capacity: 5,
                ..PlaybackConfig::default()
            },
            clock.clone(),
        );

        for i in 0..8 {
            playback.enqueue(frame_ms(i, 20));
        }

        assert_eq!(playback.queue_len(), 5);
        assert_eq!(playback.stats().frames_dropped, 3);
    }
}
