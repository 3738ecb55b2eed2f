use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::controller::TurnController;
use super::events::{TurnAction, TurnEvent};
use super::PlaybackControl;
use crate::protocol::{ControlMessage, Speaker};
use crate::session::{ConversationState, Session};

/// Upper bound on events folded into one processing cycle
const MAX_CYCLE_EVENTS: usize = 64;

/// Task that owns the [`TurnController`] for one session
pub struct TurnDriver {
    controller: TurnController,
    session: Arc<Session>,
    playback: Arc<dyn PlaybackControl>,
    state_tx: watch::Sender<ConversationState>,
}

impl TurnDriver {
    pub fn new(
        watchdog: Duration,
        session: Arc<Session>,
        playback: Arc<dyn PlaybackControl>,
        state_tx: watch::Sender<ConversationState>,
    ) -> Self {
        Self {
            controller: TurnController::new(watchdog),
            session,
            playback,
            state_tx,
        }
    }

    /// Run until the conversation reaches a terminal state or every event
    /// sender is gone. Resolves to the last published state.
    pub fn spawn(self, events: mpsc::Receiver<TurnEvent>) -> JoinHandle<ConversationState> {
        tokio::spawn(self.run(events))
    }

    async fn run(mut self, mut events: mpsc::Receiver<TurnEvent>) -> ConversationState {
        info!("Turn driver started for {}", self.session.id());

        loop {
            let deadline = self.controller.watchdog_deadline();
            // select! evaluates disabled branches too, so never hand it a None
            let sleep_until = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                received = events.recv() => {
                    let Some(first) = received else {
                        debug!("Turn event channel closed");
                        break;
                    };

                    let mut cycle = vec![first];
                    while cycle.len() < MAX_CYCLE_EVENTS {
                        match events.try_recv() {
                            Ok(event) => cycle.push(event),
                            Err(_) => break,
                        }
                    }

                    for event in &cycle {
                        self.observe(event);
                    }
                    let actions = self.controller.handle_cycle(cycle, Instant::now());
                    self.apply(actions);
                }
                _ = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {
                    let actions = self.controller.poll_watchdog(Instant::now());
                    self.apply(actions);
                }
            }

            if self.controller.state().is_terminal() {
                break;
            }
        }

        let state = self.controller.state();
        info!("Turn driver stopped in {}", state);
        state
    }

    /// Bookkeeping that does not depend on the conversation state
    fn observe(&self, event: &TurnEvent) {
        if self.controller.state().is_terminal() {
            return;
        }

        match event {
            TurnEvent::Control(ControlMessage::Transcript {
                speaker,
                text,
                is_final,
            }) => self.session.apply_transcript(*speaker, text, *is_final),
            TurnEvent::Control(ControlMessage::SpeechStarted { speaker }) => {
                self.session.begin_transcript_turn(*speaker)
            }
            TurnEvent::Control(ControlMessage::SessionStarted { session_id }) => {
                self.session.set_relay_session_id(session_id.clone())
            }
            TurnEvent::StartRefused(err) => self.session.record_error(err.clone()),
            _ => {}
        }
    }

    fn apply(&mut self, actions: Vec<TurnAction>) {
        for action in actions {
            match action {
                TurnAction::Transition { from, to } => {
                    if to == ConversationState::UserSpeaking {
                        self.session.finalize_transcript(Speaker::Ai);
                        if from == ConversationState::AiSpeaking {
                            self.session.record_interruption();
                        }
                    }
                    info!("State: {} -> {}", from, to);
                    self.state_tx.send_replace(to);
                }
                TurnAction::FlushPlayback => {
                    let dropped = self.playback.flush();
                    if dropped > 0 {
                        debug!("Flushed playback, {} units dropped", dropped);
                    }
                }
                TurnAction::Anomaly(anomaly) => {
                    warn!("Recovered: {}", anomaly);
                    self.session.record_anomaly();
                }
                TurnAction::Failed(err) => {
                    error!("Session {} failed: {}", self.session.id(), err);
                    self.session.record_error(err);
                }
            }
        }
    }
}
