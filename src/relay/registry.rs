use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::session::Difficulty;

/// What the relay reports about one live session
#[derive(Debug, Clone, Serialize)]
pub struct RelaySessionInfo {
    pub session_id: String,
    pub candidate: String,
    pub role: String,
    pub difficulty: Difficulty,
    pub started_at: DateTime<Utc>,
    /// Started with prior turns, i.e. a client reconnect
    pub resumed: bool,
}

/// Live relayed sessions, for status queries only
///
/// Sessions never read each other's entries; the map only backs the
/// `/sessions` routes.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, RelaySessionInfo>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, info: RelaySessionInfo) {
        self.sessions
            .write()
            .await
            .insert(info.session_id.clone(), info);
    }

    pub async fn remove(&self, session_id: &str) -> Option<RelaySessionInfo> {
        self.sessions.write().await.remove(session_id)
    }

    pub async fn get(&self, session_id: &str) -> Option<RelaySessionInfo> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Live sessions, oldest first
    pub async fn list(&self) -> Vec<RelaySessionInfo> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
