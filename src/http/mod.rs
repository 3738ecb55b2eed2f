//! HTTP surface of the relay
//!
//! This module serves interview clients and exposes session status:
//! - GET /ws - Upgrade to the interview WebSocket (one relayed session each)
//! - GET /sessions - List live sessions
//! - GET /sessions/:id - Query one session
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
