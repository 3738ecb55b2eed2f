//! Turn-taking
//!
//! [`TurnController`] is the pure state machine; [`TurnDriver`] is the task
//! that feeds it events, runs its watchdog and carries out its actions. The
//! driver is the only writer of the session's conversation state.

mod controller;
mod driver;
mod events;

pub use controller::{TurnController, DEFAULT_WATCHDOG};
pub use driver::TurnDriver;
pub use events::{TurnAction, TurnEvent};

/// The single external mutation path into playback: stop and clear
pub trait PlaybackControl: Send + Sync {
    /// Stop everything sounding and clear the queue; returns what was dropped
    fn flush(&self) -> usize;
}
