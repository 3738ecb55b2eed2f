use serde::{Deserialize, Serialize};
use std::fmt;

/// Who holds the floor right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Idle,
    Connecting,
    AiSpeaking,
    Listening,
    UserSpeaking,
    Processing,
    Ended,
    Error,
}

impl ConversationState {
    /// `Ended` and `Error` absorb every further event
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConversationState::Ended | ConversationState::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::Connecting => "connecting",
            ConversationState::AiSpeaking => "ai_speaking",
            ConversationState::Listening => "listening",
            ConversationState::UserSpeaking => "user_speaking",
            ConversationState::Processing => "processing",
            ConversationState::Ended => "ended",
            ConversationState::Error => "error",
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
