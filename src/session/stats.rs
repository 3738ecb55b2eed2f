use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ConversationState;

/// Statistics about an interview session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Client-side session identifier
    pub session_id: String,

    /// Conversation state at snapshot time
    pub state: ConversationState,

    /// When the session was created
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Audio frames handed to the relay
    pub frames_sent: u64,

    /// Outbound frames dropped while disconnected or backlogged
    pub frames_dropped: u64,

    /// Audio frames received from the relay
    pub frames_received: u64,

    /// Reconnects scheduled after abnormal closes
    pub reconnects: u32,

    /// Times the candidate interrupted the interviewer
    pub interruptions: u64,

    /// Watchdog recoveries
    pub anomalies: u64,

    /// Number of transcript entries
    pub transcript_entries: usize,

    /// Error that ended the session, if any
    pub last_error: Option<String>,
}
