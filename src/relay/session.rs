use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::error::RelayError;
use super::instructions::build_instructions;
use super::provider::{ProviderCommand, ProviderEvent, UpstreamEvent};
use super::registry::{RelaySessionInfo, SessionRegistry};
use super::upstream::{Upstream, UpstreamConnector};
use crate::protocol::{ControlMessage, PriorTurn, WireMessage, CLOSE_NORMAL};
use crate::session::{CandidateContext, InterviewProfile};

type ClientSink = SplitSink<WebSocket, Message>;
type ClientStream = SplitStream<WebSocket>;

/// Relay behaviour
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How long a client may take to send `start_session`
    pub start_timeout: Duration,
    /// Provider voice for the interviewer
    pub voice: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(15),
            voice: "alloy".to_string(),
        }
    }
}

/// One relayed interview: a client socket paired with one provider connection
pub struct RelaySession {
    upstream: Arc<dyn UpstreamConnector>,
    registry: SessionRegistry,
    config: RelayConfig,
}

impl RelaySession {
    pub fn new(
        upstream: Arc<dyn UpstreamConnector>,
        registry: SessionRegistry,
        config: RelayConfig,
    ) -> Self {
        Self {
            upstream,
            registry,
            config,
        }
    }

    /// Serve the client until either side goes away
    pub async fn run(self, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();

        let (code, reason) = match self.relay(&mut sink, &mut stream).await {
            Ok(()) => (CLOSE_NORMAL, "session ended".to_string()),
            Err(err) => {
                warn!("Relay session failed: {}", err);
                if !matches!(err, RelayError::Client(_)) {
                    let message = ControlMessage::Error {
                        message: err.to_string(),
                    };
                    if let Err(e) = send_wire(&mut sink, message.into()).await {
                        debug!("Could not report failure to client: {}", e);
                    }
                }
                (err.close_code(), err.to_string())
            }
        };

        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
            debug!("Client already gone: {}", e);
        }
    }

    async fn relay(
        &self,
        sink: &mut ClientSink,
        stream: &mut ClientStream,
    ) -> Result<(), RelayError> {
        send_wire(sink, ControlMessage::Connected.into()).await?;

        let (context, profile, prior_turns) =
            tokio::time::timeout(self.config.start_timeout, wait_for_start(stream))
                .await
                .map_err(|_| RelayError::StartTimeout(self.config.start_timeout.as_secs()))??;

        context.validate()?;
        profile.validate()?;

        let upstream = self.upstream.connect().await?;

        // Context goes upstream exactly once, then the interviewer opens
        let setup = [
            ProviderCommand::UpdateSession {
                instructions: build_instructions(&context, &profile, &prior_turns),
                voice: self.config.voice.clone(),
            },
            ProviderCommand::CreateResponse,
        ];
        for command in setup {
            if upstream.commands.send(command).await.is_err() {
                return Err(RelayError::UpstreamClosed(
                    "provider closed during setup".to_string(),
                ));
            }
        }

        let session_id = format!("relay-{}", uuid::Uuid::new_v4());
        self.registry
            .insert(RelaySessionInfo {
                session_id: session_id.clone(),
                candidate: context.name.clone(),
                role: profile.role.clone(),
                difficulty: profile.difficulty,
                started_at: Utc::now(),
                resumed: !prior_turns.is_empty(),
            })
            .await;
        info!(
            "Relay session {} started for {} ({} prior turns)",
            session_id,
            profile.role,
            prior_turns.len()
        );

        let result = match send_wire(
            sink,
            ControlMessage::SessionStarted {
                session_id: session_id.clone(),
            }
            .into(),
        )
        .await
        {
            Ok(()) => forward(sink, stream, upstream).await,
            Err(e) => Err(e),
        };

        self.registry.remove(&session_id).await;
        info!("Relay session {} finished", session_id);
        result
    }
}

/// Read until the client's `start_session`. Audio sent early is dropped.
async fn wait_for_start(
    stream: &mut ClientStream,
) -> Result<(CandidateContext, InterviewProfile, Vec<PriorTurn>), RelayError> {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let control = ControlMessage::from_json(&text)
                    .map_err(|e| RelayError::Protocol(e.to_string()))?;
                return match control {
                    ControlMessage::StartSession {
                        candidate_context,
                        profile,
                        prior_turns,
                    } => Ok((candidate_context, profile, prior_turns)),
                    other => Err(RelayError::UnexpectedMessage(other.kind())),
                };
            }
            Ok(Message::Binary(_)) => debug!("Dropping audio received before start_session"),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => return Err(RelayError::Client(e.to_string())),
        }
    }
    Err(RelayError::Client("closed before start_session".to_string()))
}

/// The two forwarding loops. Whichever side finishes first ends the session.
async fn forward(
    sink: &mut ClientSink,
    stream: &mut ClientStream,
    upstream: Upstream,
) -> Result<(), RelayError> {
    let Upstream {
        commands,
        mut events,
    } = upstream;

    let client_to_upstream = async {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Binary(pcm)) => {
                    if commands
                        .send(ProviderCommand::AppendAudio(pcm))
                        .await
                        .is_err()
                    {
                        return Err(RelayError::UpstreamClosed(
                            "provider connection task ended".to_string(),
                        ));
                    }
                }
                Ok(Message::Text(text)) => match ControlMessage::from_json(&text) {
                    Ok(ControlMessage::StartSession { .. }) => {
                        debug!("Ignoring repeated start_session, context already injected");
                    }
                    Ok(ControlMessage::SessionEnded) => return Ok(()),
                    Ok(other) => debug!("Ignoring client {}", other.kind()),
                    Err(e) => warn!("Ignoring malformed client message: {}", e),
                },
                Ok(Message::Close(_)) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(RelayError::Client(e.to_string())),
            }
        }
        Ok(())
    };

    let upstream_to_client = async {
        while let Some(event) = events.recv().await {
            match event {
                UpstreamEvent::Event(ProviderEvent::Error { error }) => {
                    return Err(RelayError::Upstream(error.message));
                }
                UpstreamEvent::Event(event) => {
                    if let Some(wire) = event.into_wire()? {
                        send_wire(sink, wire).await?;
                    }
                }
                UpstreamEvent::Closed(reason) => return Err(RelayError::UpstreamClosed(reason)),
            }
        }
        Err(RelayError::UpstreamClosed(
            "provider connection task ended".to_string(),
        ))
    };

    tokio::select! {
        result = client_to_upstream => {
            debug!("Client side finished");
            result
        }
        result = upstream_to_client => {
            debug!("Provider side finished");
            result
        }
    }
}

async fn send_wire(sink: &mut ClientSink, message: WireMessage) -> Result<(), RelayError> {
    let frame = match message {
        WireMessage::Control(control) => Message::Text(
            control
                .to_json()
                .map_err(|e| RelayError::Protocol(e.to_string()))?,
        ),
        WireMessage::Audio(pcm) => Message::Binary(pcm),
    };
    sink.send(frame)
        .await
        .map_err(|e| RelayError::Client(e.to_string()))
}
