//! Client ⇄ relay wire protocol
//!
//! One WebSocket carries two message shapes: text frames holding exactly one
//! JSON [`ControlMessage`] (tagged by `type`), and binary frames holding exactly
//! one PCM16 audio frame with no envelope.

pub mod messages;

pub use messages::{
    ControlMessage, PriorTurn, Speaker, WireMessage, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL,
    CLOSE_POLICY_VIOLATION,
};
