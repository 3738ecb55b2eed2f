//! Interview session management
//!
//! This module provides the client-side `VoiceSession` and the pieces it is
//! built from:
//! - `Session`: the shared aggregate every component reads through
//! - Candidate context and interview profile, validated before start
//! - The transcript, amended in place until each entry is final
//! - The product backend (credential at start, persistence at the end)

mod backend;
mod config;
pub(crate) mod context;
mod session;
mod shared;
mod state;
mod stats;
mod transcript;

pub use backend::{HttpSessionBackend, NoopBackend, SessionBackend, SessionCredential};
pub use config::SessionConfig;
pub use context::{CandidateContext, Difficulty, InterviewProfile};
pub use session::{SessionIo, VoiceSession};
pub use shared::Session;
pub use state::ConversationState;
pub use stats::SessionStats;
pub use transcript::{Transcript, TranscriptEntry};
