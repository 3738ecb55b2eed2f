//! Realtime provider protocol
//!
//! The provider speaks JSON events over a WebSocket with base64 PCM16 audio.
//! Only the events that drive the interview are modelled; everything else is
//! parsed as [`ProviderEvent::Other`] and ignored.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;

use super::error::RelayError;
use crate::protocol::{ControlMessage, Speaker, WireMessage};

/// Commands the relay sends upstream
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCommand {
    /// Configure the conversation; sent once per session
    UpdateSession { instructions: String, voice: String },
    /// Append candidate audio (raw PCM16 LE)
    AppendAudio(Vec<u8>),
    /// Ask the provider to speak
    CreateResponse,
}

impl ProviderCommand {
    pub fn to_json(&self) -> String {
        let value = match self {
            ProviderCommand::UpdateSession { instructions, voice } => json!({
                "type": "session.update",
                "session": {
                    "modalities": ["audio", "text"],
                    "instructions": instructions,
                    "voice": voice,
                    "input_audio_format": "pcm16",
                    "output_audio_format": "pcm16",
                    "input_audio_transcription": { "model": "whisper-1" },
                    "turn_detection": { "type": "server_vad" },
                }
            }),
            ProviderCommand::AppendAudio(pcm) => json!({
                "type": "input_audio_buffer.append",
                "audio": STANDARD.encode(pcm),
            }),
            ProviderCommand::CreateResponse => json!({ "type": "response.create" }),
        };
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

/// Events the provider sends back
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderEvent {
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    #[serde(rename = "response.created")]
    ResponseCreated,
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },
    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta { delta: String },
    #[serde(rename = "response.audio_transcript.done")]
    TranscriptDone {
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscript {
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "error")]
    Error { error: ProviderErrorBody },
    #[serde(other)]
    Other,
}

impl ProviderEvent {
    pub fn from_json(raw: &str) -> Result<Self, RelayError> {
        serde_json::from_str(raw).map_err(|e| RelayError::Protocol(format!("provider event: {e}")))
    }

    /// Translate into what the client sees. Returns `None` for events the
    /// client does not care about.
    pub fn into_wire(self) -> Result<Option<WireMessage>, RelayError> {
        let message = match self {
            ProviderEvent::SpeechStarted => ControlMessage::SpeechStarted {
                speaker: Speaker::User,
            },
            ProviderEvent::SpeechStopped => ControlMessage::SpeechStopped {
                speaker: Speaker::User,
            },
            ProviderEvent::ResponseCreated => ControlMessage::SpeechStarted {
                speaker: Speaker::Ai,
            },
            ProviderEvent::AudioDelta { delta } => {
                let pcm = STANDARD
                    .decode(delta.as_bytes())
                    .map_err(|e| RelayError::Protocol(format!("audio delta: {e}")))?;
                return Ok(Some(WireMessage::Audio(pcm)));
            }
            ProviderEvent::TranscriptDelta { delta } => ControlMessage::Transcript {
                speaker: Speaker::Ai,
                text: delta,
                is_final: false,
            },
            ProviderEvent::TranscriptDone { transcript } => ControlMessage::Transcript {
                speaker: Speaker::Ai,
                text: transcript,
                is_final: true,
            },
            ProviderEvent::InputTranscript { transcript } => ControlMessage::Transcript {
                speaker: Speaker::User,
                text: transcript,
                is_final: true,
            },
            ProviderEvent::ResponseDone => ControlMessage::ResponseDone,
            ProviderEvent::Error { error } => ControlMessage::Error {
                message: error.message,
            },
            ProviderEvent::Other => return Ok(None),
        };
        Ok(Some(WireMessage::Control(message)))
    }
}

/// What the upstream connection task reports to the relay
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Event(ProviderEvent),
    Closed(String),
}
