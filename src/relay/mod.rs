//! Server-side relay
//!
//! Terminates one client connection per interview, opens the matching
//! provider connection, injects the candidate context once and forwards
//! traffic both ways:
//! - client audio → `input_audio_buffer.append`
//! - provider speech, transcript and completion events → control messages
//! - provider audio deltas → binary frames
//!
//! Losing the provider ends the session with an `error` message and close
//! code 1011.

mod error;
mod instructions;
mod provider;
mod registry;
mod session;
mod upstream;

pub use error::RelayError;
pub use instructions::build_instructions;
pub use provider::{ProviderCommand, ProviderErrorBody, ProviderEvent, UpstreamEvent};
pub use registry::{RelaySessionInfo, SessionRegistry};
pub use session::{RelayConfig, RelaySession};
pub use upstream::{RealtimeConfig, RealtimeConnector, Upstream, UpstreamConnector};
