use std::time::Duration;

use crate::errors::SessionError;
use crate::protocol::{ControlMessage, Speaker};
use crate::session::ConversationState;

/// Everything the turn controller reacts to
///
/// Transport, playback and the session API only translate what they observe
/// into one of these; none of them touch the conversation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// The session is opening its connection
    ConnectRequested,
    /// A control message from the relay
    Control(ControlMessage),
    /// An inbound audio frame arrived from the provider
    ProviderAudio,
    /// Playback queue drained and nothing is sounding
    PlaybackComplete,
    /// The connection dropped and a reconnect is scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// The client refused to start (invalid profile); nothing was sent
    StartRefused(SessionError),
    /// The candidate ended the interview
    EndRequested,
    /// Fatal failure from transport, device or provider
    Failed(SessionError),
}

impl TurnEvent {
    /// Provider-side signal that the assistant finished its turn
    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            TurnEvent::PlaybackComplete | TurnEvent::Control(ControlMessage::ResponseDone)
        )
    }

    /// The candidate started talking
    pub fn is_user_speech_start(&self) -> bool {
        matches!(
            self,
            TurnEvent::Control(ControlMessage::SpeechStarted {
                speaker: Speaker::User
            })
        )
    }
}

/// Side effects requested by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction {
    /// Publish the new state
    Transition {
        from: ConversationState,
        to: ConversationState,
    },
    /// Silence the assistant: stop playback and clear the queue
    FlushPlayback,
    /// The watchdog forced a recovery (logged, not a failure)
    Anomaly(SessionError),
    /// The session failed; carries the originating error
    Failed(SessionError),
}
