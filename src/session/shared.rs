use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::context::{CandidateContext, InterviewProfile};
use super::state::ConversationState;
use super::stats::SessionStats;
use super::transcript::{Transcript, TranscriptEntry};
use crate::errors::SessionError;
use crate::protocol::{PriorTurn, Speaker};

/// The session aggregate shared by every component of one interview
///
/// Components receive an `Arc<Session>` at construction and read the latest
/// values through it. Only the turn driver holds the state sender.
#[derive(Debug)]
pub struct Session {
    id: String,
    context: CandidateContext,
    profile: InterviewProfile,
    started_at: DateTime<Utc>,
    state: watch::Receiver<ConversationState>,
    transcript: Mutex<Transcript>,
    relay_session_id: Mutex<Option<String>>,
    last_error: Mutex<Option<SessionError>>,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    frames_received: AtomicU64,
    reconnects: AtomicU32,
    interruptions: AtomicU64,
    anomalies: AtomicU64,
}

impl Session {
    pub fn new(
        context: CandidateContext,
        profile: InterviewProfile,
    ) -> (Arc<Self>, watch::Sender<ConversationState>) {
        let (state_tx, state_rx) = watch::channel(ConversationState::Idle);
        let session = Arc::new(Self {
            id: format!("interview-{}", uuid::Uuid::new_v4()),
            context,
            profile,
            started_at: Utc::now(),
            state: state_rx,
            transcript: Mutex::new(Transcript::new()),
            relay_session_id: Mutex::new(None),
            last_error: Mutex::new(None),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            reconnects: AtomicU32::new(0),
            interruptions: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
        });
        (session, state_tx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &CandidateContext {
        &self.context
    }

    pub fn profile(&self) -> &InterviewProfile {
        &self.profile
    }

    pub fn state(&self) -> ConversationState {
        *self.state.borrow()
    }

    /// A receiver that observes every state the turn driver publishes
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.clone()
    }

    /// Session id assigned by the relay, once `session_started` arrived
    pub fn relay_session_id(&self) -> Option<String> {
        self.relay_session_id.lock().clone()
    }

    pub(crate) fn set_relay_session_id(&self, id: String) {
        *self.relay_session_id.lock() = Some(id);
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.last_error.lock().clone()
    }

    /// Keeps the first error; later ones are consequences of it
    pub(crate) fn record_error(&self, err: SessionError) {
        let mut slot = self.last_error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub(crate) fn apply_transcript(&self, speaker: Speaker, text: &str, is_final: bool) {
        self.transcript
            .lock()
            .apply(speaker, text, is_final, Utc::now());
    }

    pub(crate) fn finalize_transcript(&self, speaker: Speaker) {
        self.transcript.lock().finalize_open(speaker);
    }

    pub(crate) fn begin_transcript_turn(&self, speaker: Speaker) {
        self.transcript.lock().begin_turn(speaker);
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.lock().entries().to_vec()
    }

    /// Finalized turns, replayed to the relay after a reconnect
    pub fn prior_turns(&self) -> Vec<PriorTurn> {
        self.transcript.lock().prior_turns()
    }

    pub(crate) fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_interruption(&self) {
        self.interruptions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the session counters
    pub fn stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);
        SessionStats {
            session_id: self.id.clone(),
            state: self.state(),
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            transcript_entries: self.transcript.lock().len(),
            last_error: self.last_error().map(|e| e.to_string()),
        }
    }
}
