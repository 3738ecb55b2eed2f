use super::state::AppState;
use crate::relay::{RelaySession, RelaySessionInfo};
use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{info, warn};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub count: usize,
    pub sessions: Vec<RelaySessionInfo>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /ws
/// Upgrade to the interview WebSocket and relay it to the provider
pub async fn interview_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    info!("Interview client connecting");

    let relay = RelaySession::new(
        state.upstream.clone(),
        state.sessions.clone(),
        state.relay.clone(),
    );

    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| relay.run(socket))
}

/// GET /sessions
/// List live relayed sessions
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.sessions.list().await;

    (
        StatusCode::OK,
        Json(SessionListResponse {
            count: sessions.len(),
            sessions,
        }),
    )
}

/// GET /sessions/:session_id
/// Get status of one relayed session
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.sessions.get(&session_id).await {
        Some(info) => (StatusCode::OK, Json(info)).into_response(),
        None => {
            warn!("Session {} not found", session_id);
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("Session {} not found", session_id),
                }),
            )
                .into_response()
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
