//! Turn-taking state machine.
//!
//! A single step function consumes [`TurnEvent`]s and returns the
//! [`TurnAction`]s the runtime must perform. Time is passed in explicitly so
//! the watchdog can be exercised without real timers.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::events::{TurnAction, TurnEvent};
use crate::errors::SessionError;
use crate::protocol::{ControlMessage, Speaker};
use crate::session::ConversationState;

/// Default bound on how long the assistant may hold the floor without a
/// completion signal
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(30);

/// Authoritative owner of the conversation state
#[derive(Debug)]
pub struct TurnController {
    state: ConversationState,
    watchdog_timeout: Duration,
    watchdog_deadline: Option<Instant>,
    failure: Option<SessionError>,
    anomalies: u64,
}

impl TurnController {
    pub fn new(watchdog_timeout: Duration) -> Self {
        Self {
            state: ConversationState::Idle,
            watchdog_timeout,
            watchdog_deadline: None,
            failure: None,
            anomalies: 0,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// The error that moved the session into `Error`, if any
    pub fn failure(&self) -> Option<&SessionError> {
        self.failure.as_ref()
    }

    /// When the armed watchdog expires
    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.watchdog_deadline
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    /// Process every event gathered in one cycle.
    ///
    /// If the candidate started speaking in this cycle, completion signals
    /// from the same cycle are discarded: yielding the floor to a live speaker
    /// wins over finishing the assistant's turn.
    pub fn handle_cycle(
        &mut self,
        events: impl IntoIterator<Item = TurnEvent>,
        now: Instant,
    ) -> Vec<TurnAction> {
        let events: Vec<TurnEvent> = events.into_iter().collect();
        let barge_in = events.iter().any(TurnEvent::is_user_speech_start);

        let mut actions = Vec::new();
        for event in events {
            if barge_in && event.is_completion() {
                debug!("Discarding {:?}: candidate started speaking in the same cycle", event);
                continue;
            }
            actions.extend(self.handle(event, now));
        }
        actions
    }

    /// Apply a single event
    pub fn handle(&mut self, event: TurnEvent, now: Instant) -> Vec<TurnAction> {
        let mut actions = Vec::new();

        if self.state.is_terminal() {
            debug!("Ignoring {:?} in terminal state {}", event, self.state);
            return actions;
        }

        match event {
            TurnEvent::ConnectRequested => {
                if self.state == ConversationState::Idle {
                    self.transition(ConversationState::Connecting, now, &mut actions);
                }
            }
            TurnEvent::StartRefused(err) => {
                warn!("Session start refused, staying in {}: {}", self.state, err);
            }
            TurnEvent::Reconnecting { attempt, delay } => {
                info!(
                    "Reconnecting (attempt {}) in {}ms",
                    attempt,
                    delay.as_millis()
                );
                actions.push(TurnAction::FlushPlayback);
                self.transition(ConversationState::Connecting, now, &mut actions);
            }
            TurnEvent::Control(message) => self.handle_control(message, now, &mut actions),
            TurnEvent::ProviderAudio => self.provider_activity(now, &mut actions),
            TurnEvent::PlaybackComplete => {
                // Leftover audio from a cancelled response can drain while the
                // provider is still working on the next one
                if self.state == ConversationState::AiSpeaking {
                    self.transition(ConversationState::Listening, now, &mut actions);
                }
            }
            TurnEvent::EndRequested => {
                actions.push(TurnAction::FlushPlayback);
                self.transition(ConversationState::Ended, now, &mut actions);
            }
            TurnEvent::Failed(err) => self.fail(err, now, &mut actions),
        }

        actions
    }

    /// Fire the watchdog if it expired. Fires at most once per arming.
    pub fn poll_watchdog(&mut self, now: Instant) -> Vec<TurnAction> {
        let mut actions = Vec::new();
        let Some(deadline) = self.watchdog_deadline else {
            return actions;
        };
        if now < deadline || self.state != ConversationState::AiSpeaking {
            return actions;
        }

        self.anomalies += 1;
        let anomaly = SessionError::StateAnomaly(self.watchdog_timeout);
        warn!("{}", anomaly);
        actions.push(TurnAction::Anomaly(anomaly));
        self.transition(ConversationState::Listening, now, &mut actions);
        actions
    }

    fn handle_control(&mut self, message: ControlMessage, now: Instant, actions: &mut Vec<TurnAction>) {
        match message {
            ControlMessage::SessionStarted { .. } => {
                if matches!(
                    self.state,
                    ConversationState::Idle | ConversationState::Connecting
                ) {
                    self.transition(ConversationState::AiSpeaking, now, actions);
                } else {
                    warn!("Unexpected session_started in {}", self.state);
                }
            }
            ControlMessage::SpeechStarted {
                speaker: Speaker::User,
            } => {
                actions.push(TurnAction::FlushPlayback);
                if matches!(
                    self.state,
                    ConversationState::AiSpeaking
                        | ConversationState::Processing
                        | ConversationState::Listening
                ) {
                    self.transition(ConversationState::UserSpeaking, now, actions);
                }
            }
            ControlMessage::SpeechStopped {
                speaker: Speaker::User,
            } => {
                if self.state == ConversationState::UserSpeaking {
                    self.transition(ConversationState::Processing, now, actions);
                }
            }
            ControlMessage::SpeechStarted { speaker: Speaker::Ai }
            | ControlMessage::Transcript {
                speaker: Speaker::Ai,
                ..
            } => self.provider_activity(now, actions),
            ControlMessage::ResponseDone => self.response_done(now, actions),
            ControlMessage::SessionEnded => {
                actions.push(TurnAction::FlushPlayback);
                self.transition(ConversationState::Ended, now, actions);
            }
            ControlMessage::Error { message } => {
                self.fail(SessionError::Upstream(message), now, actions)
            }
            ControlMessage::SpeechStopped { speaker: Speaker::Ai }
            | ControlMessage::Transcript {
                speaker: Speaker::User,
                ..
            }
            | ControlMessage::Connected => {}
            ControlMessage::StartSession { .. } => {
                warn!("Ignoring start_session received from the relay");
            }
        }
    }

    fn provider_activity(&mut self, now: Instant, actions: &mut Vec<TurnAction>) {
        if matches!(
            self.state,
            ConversationState::Listening | ConversationState::Processing
        ) {
            self.transition(ConversationState::AiSpeaking, now, actions);
        }
    }

    fn response_done(&mut self, now: Instant, actions: &mut Vec<TurnAction>) {
        if matches!(
            self.state,
            ConversationState::AiSpeaking | ConversationState::Processing
        ) {
            self.transition(ConversationState::Listening, now, actions);
        }
    }

    fn fail(&mut self, err: SessionError, now: Instant, actions: &mut Vec<TurnAction>) {
        if !err.is_fatal() {
            warn!("Recovered anomaly reported as failure: {}", err);
            return;
        }
        actions.push(TurnAction::FlushPlayback);
        actions.push(TurnAction::Failed(err.clone()));
        self.failure = Some(err);
        self.transition(ConversationState::Error, now, actions);
    }

    fn transition(&mut self, to: ConversationState, now: Instant, actions: &mut Vec<TurnAction>) {
        let from = self.state;
        if from == to {
            return;
        }

        self.watchdog_deadline = if to == ConversationState::AiSpeaking {
            Some(now + self.watchdog_timeout)
        } else {
            None
        };

        self.state = to;
        debug!("Conversation state {} -> {}", from, to);
        actions.push(TurnAction::Transition { from, to });
    }
}

impl Default for TurnController {
    fn default() -> Self {
        Self::new(DEFAULT_WATCHDOG)
    }
}
