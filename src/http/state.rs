use crate::relay::{RelayConfig, SessionRegistry, UpstreamConnector};
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Live relayed sessions (session_id → info)
    pub sessions: SessionRegistry,

    /// Opens one provider connection per relayed session
    pub upstream: Arc<dyn UpstreamConnector>,

    /// Handshake timeout and provider voice
    pub relay: RelayConfig,

    /// Largest WebSocket message accepted from a client
    pub max_message_bytes: usize,
}

impl AppState {
    pub fn new(upstream: Arc<dyn UpstreamConnector>, relay: RelayConfig) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            upstream,
            relay,
            max_message_bytes: 1024 * 1024,
        }
    }
}
