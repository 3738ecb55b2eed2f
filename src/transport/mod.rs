//! Client side of the relay connection
//!
//! One [`Transport`] per session owns the connection: it performs the
//! `connected` / `start_session` handshake, reconnects with backoff after an
//! abnormal close, and dispatches inbound traffic. Control messages go to the
//! turn controller, audio goes to an [`AudioSink`].

mod client;
mod link;
mod retry;

pub use client::{Transport, TransportConfig, TransportHandle};
pub use link::{Connector, Link, LinkCommand, LinkEvent, WebSocketConnector, CLOSE_ABNORMAL};
pub use retry::RetryPolicy;

use crate::audio::AudioFrame;

/// Receives inbound audio frames; must not block
pub trait AudioSink: Send + Sync {
    fn deliver(&self, frame: AudioFrame);
}
