pub mod audio;
pub mod config;
pub mod errors;
pub mod http;
pub mod playback;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod transport;
pub mod turn;

pub use audio::{
    AudioFile, AudioFrame, AudioFramer, CaptureBackend, CaptureBackendFactory, CaptureConfig,
    CaptureEvent, CaptureSource, ChannelCapture, FileCapture, FramerConfig, WavRecorder,
};
pub use config::Config;
pub use errors::{ErrorKind, RecoveryAction, SessionError};
pub use http::{create_router, AppState};
pub use playback::{PlaybackConfig, PlaybackHandle, PlaybackScheduler};
pub use protocol::{ControlMessage, PriorTurn, Speaker, WireMessage};
pub use relay::{RealtimeConnector, RelayConfig, RelaySession, SessionRegistry};
pub use session::{
    CandidateContext, ConversationState, Difficulty, InterviewProfile, SessionConfig, SessionIo,
    SessionStats, VoiceSession,
};
pub use transport::{RetryPolicy, Transport, TransportConfig, WebSocketConnector};
pub use turn::{TurnController, TurnEvent};
