use thiserror::Error;

use crate::errors::SessionError;
use crate::protocol::{CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION};

/// Errors that end one relayed session
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("client sent {0} before start_session")]
    UnexpectedMessage(&'static str),

    #[error("client did not send start_session within {0}s")]
    StartTimeout(u64),

    #[error("rejected session: {0}")]
    Rejected(#[from] SessionError),

    #[error("could not reach the interview provider: {0}")]
    UpstreamConnect(String),

    #[error("interview provider connection lost: {0}")]
    UpstreamClosed(String),

    #[error("interview provider error: {0}")]
    Upstream(String),

    #[error("client connection error: {0}")]
    Client(String),

    #[error("malformed message: {0}")]
    Protocol(String),
}

impl RelayError {
    /// Close code sent to the client when this error ends the session
    pub fn close_code(&self) -> u16 {
        match self {
            RelayError::UnexpectedMessage(_)
            | RelayError::Rejected(_)
            | RelayError::Protocol(_) => CLOSE_POLICY_VIOLATION,
            RelayError::StartTimeout(_) | RelayError::Client(_) => CLOSE_NORMAL,
            RelayError::UpstreamConnect(_)
            | RelayError::UpstreamClosed(_)
            | RelayError::Upstream(_) => CLOSE_INTERNAL_ERROR,
        }
    }

    /// Whether the failure is on the provider side
    pub fn is_upstream(&self) -> bool {
        self.close_code() == CLOSE_INTERNAL_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_failures_close_with_internal_error() {
        assert_eq!(
            RelayError::UpstreamClosed("eof".into()).close_code(),
            CLOSE_INTERNAL_ERROR
        );
        assert!(RelayError::Upstream("rate limited".into()).is_upstream());
        assert!(!RelayError::StartTimeout(15).is_upstream());
    }

    #[test]
    fn test_rejected_context_is_policy_violation() {
        let err = RelayError::from(SessionError::InvalidContext("major"));
        assert_eq!(err.close_code(), CLOSE_POLICY_VIOLATION);
        assert!(err.to_string().contains("major"));
    }
}
