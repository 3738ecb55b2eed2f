//! Error types for voice interview sessions.
//!
//! `SessionError` is the taxonomy every client-side component reports through.
//! The kind decides propagation: connectivity failures are retried by the
//! transport, everything else drives the turn controller straight into its
//! terminal `Error` state (except state anomalies, which are recovered).

use std::time::Duration;

use thiserror::Error;

/// Errors raised while a session is running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Connection to the interview relay failed: {0}")]
    Connectivity(String),

    #[error("Interview relay did not answer {stage} within {}s", .waited.as_secs())]
    ProtocolTimeout { stage: &'static str, waited: Duration },

    #[error("Microphone unavailable: {0}")]
    Device(String),

    #[error("Interview service failed: {0}")]
    Upstream(String),

    #[error("Turn watchdog forced the floor back to the candidate after {}s", .0.as_secs())]
    StateAnomaly(Duration),

    #[error("Candidate profile is missing `{0}`")]
    InvalidContext(&'static str),

    #[error("Protocol violation: {0}")]
    Protocol(String),
}

/// Coarse classification used for propagation decisions and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connectivity,
    ProtocolTimeout,
    Device,
    Upstream,
    StateAnomaly,
    InvalidContext,
    Protocol,
}

/// Recovery action offered to the candidate alongside a failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Start a fresh session.
    Retry,
    /// Reload the client (device permissions, stale credentials).
    Reload,
    /// Nothing to do, the session recovered by itself.
    None,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Connectivity(_) => ErrorKind::Connectivity,
            SessionError::ProtocolTimeout { .. } => ErrorKind::ProtocolTimeout,
            SessionError::Device(_) => ErrorKind::Device,
            SessionError::Upstream(_) => ErrorKind::Upstream,
            SessionError::StateAnomaly(_) => ErrorKind::StateAnomaly,
            SessionError::InvalidContext(_) => ErrorKind::InvalidContext,
            SessionError::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// Only connectivity failures go through the reconnect path.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Connectivity(_))
    }

    /// Whether this error ends the session once it reaches the turn controller.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::StateAnomaly(_))
    }

    pub fn recovery(&self) -> RecoveryAction {
        match self {
            SessionError::Connectivity(_)
            | SessionError::ProtocolTimeout { .. }
            | SessionError::Upstream(_) => RecoveryAction::Retry,
            SessionError::Device(_)
            | SessionError::InvalidContext(_)
            | SessionError::Protocol(_) => RecoveryAction::Reload,
            SessionError::StateAnomaly(_) => RecoveryAction::None,
        }
    }

    /// Message shown to the candidate. Specific per failure, never generic.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Connectivity(_) => {
                "We lost the connection to the interviewer and could not reconnect. \
                 Check your network and retry the interview."
                    .to_string()
            }
            SessionError::ProtocolTimeout { stage, .. } => format!(
                "The interviewer did not respond while {stage}. \
                 The service may be busy, please retry in a moment."
            ),
            SessionError::Device(reason) => format!(
                "Your microphone stopped working ({reason}). \
                 Allow microphone access and reload the page."
            ),
            SessionError::Upstream(reason) => format!(
                "The interview service reported an error ({reason}). Please retry the interview."
            ),
            SessionError::StateAnomaly(_) => {
                "The interviewer paused unexpectedly, it's your turn to speak.".to_string()
            }
            SessionError::InvalidContext(field) => format!(
                "Your profile is missing `{field}`. Complete it and reload to start the interview."
            ),
            SessionError::Protocol(reason) => format!(
                "The interview connection sent unexpected data ({reason}). Reload to start over."
            ),
        }
    }
}
