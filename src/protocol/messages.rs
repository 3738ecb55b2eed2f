use serde::{Deserialize, Serialize};

use crate::errors::SessionError;
use crate::session::{CandidateContext, InterviewProfile};

/// Close code for a deliberate, user-initiated or completed session
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code used by the relay when the upstream side failed
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Close code used when the peer broke the protocol
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Which party a speech or transcript event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Ai,
    User,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Ai => "ai",
            Speaker::User => "user",
        }
    }
}

/// A finished turn replayed to the relay on reconnect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorTurn {
    pub speaker: Speaker,
    pub text: String,
}

/// Control messages exchanged as text frames. Never carries audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Connected,
    StartSession {
        candidate_context: CandidateContext,
        profile: InterviewProfile,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        prior_turns: Vec<PriorTurn>,
    },
    SessionStarted {
        session_id: String,
    },
    SpeechStarted {
        speaker: Speaker,
    },
    SpeechStopped {
        speaker: Speaker,
    },
    Transcript {
        speaker: Speaker,
        text: String,
        is_final: bool,
    },
    ResponseDone,
    SessionEnded,
    Error {
        message: String,
    },
}

impl ControlMessage {
    pub fn to_json(&self) -> Result<String, SessionError> {
        serde_json::to_string(self)
            .map_err(|e| SessionError::Protocol(format!("failed to encode control message: {e}")))
    }

    pub fn from_json(raw: &str) -> Result<Self, SessionError> {
        serde_json::from_str(raw)
            .map_err(|e| SessionError::Protocol(format!("invalid control message: {e}")))
    }

    /// Discriminator as it appears on the wire, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Connected => "connected",
            ControlMessage::StartSession { .. } => "start_session",
            ControlMessage::SessionStarted { .. } => "session_started",
            ControlMessage::SpeechStarted { .. } => "speech_started",
            ControlMessage::SpeechStopped { .. } => "speech_stopped",
            ControlMessage::Transcript { .. } => "transcript",
            ControlMessage::ResponseDone => "response_done",
            ControlMessage::SessionEnded => "session_ended",
            ControlMessage::Error { .. } => "error",
        }
    }
}

/// One transport message: either a control message or one audio frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Control(ControlMessage),
    /// PCM16 LE payload, no envelope
    Audio(Vec<u8>),
}

impl From<ControlMessage> for WireMessage {
    fn from(message: ControlMessage) -> Self {
        WireMessage::Control(message)
    }
}
