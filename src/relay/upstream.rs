use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::error::RelayError;
use super::provider::{ProviderCommand, ProviderEvent, UpstreamEvent};

const UPSTREAM_BUFFER: usize = 256;

/// One open provider connection, seen as two channels
#[derive(Debug)]
pub struct Upstream {
    pub commands: mpsc::Sender<ProviderCommand>,
    pub events: mpsc::Receiver<UpstreamEvent>,
}

impl Upstream {
    /// Build both ends; the second half belongs to whoever plays the provider
    pub fn pair() -> (
        Upstream,
        mpsc::Receiver<ProviderCommand>,
        mpsc::Sender<UpstreamEvent>,
    ) {
        let (commands, command_rx) = mpsc::channel(UPSTREAM_BUFFER);
        let (event_tx, events) = mpsc::channel(UPSTREAM_BUFFER);
        (Upstream { commands, events }, command_rx, event_tx)
    }
}

/// Opens provider connections, one per relayed session
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self) -> Result<Upstream, RelayError>;
}

/// Connection settings for a realtime provider
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub url: String,
    pub model: String,
    pub voice: String,
    pub api_key: Option<String>,
}

/// Realtime provider reached over a WebSocket
#[derive(Debug, Clone)]
pub struct RealtimeConnector {
    config: RealtimeConfig,
}

impl RealtimeConnector {
    pub fn new(config: RealtimeConfig) -> Self {
        Self { config }
    }

    pub fn voice(&self) -> &str {
        &self.config.voice
    }
}

#[async_trait]
impl UpstreamConnector for RealtimeConnector {
    async fn connect(&self) -> Result<Upstream, RelayError> {
        let url = format!("{}?model={}", self.config.url, self.config.model);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::UpstreamConnect(format!("invalid provider url: {e}")))?;

        if let Some(key) = &self.config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| RelayError::UpstreamConnect(format!("invalid api key: {e}")))?;
            request.headers_mut().insert("Authorization", value);
        }
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| RelayError::UpstreamConnect(e.to_string()))?;
        info!("Connected to provider ({})", self.config.model);

        let (upstream, mut commands, events) = Upstream::pair();
        let (mut ws_sink, mut ws_source) = ws_stream.split();

        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    command = commands.recv() => match command {
                        Some(command) => {
                            if let Err(e) = ws_sink.send(Message::Text(command.to_json())).await {
                                break format!("send failed: {e}");
                            }
                        }
                        None => {
                            debug!("Relay released the provider connection");
                            let _ = ws_sink.send(Message::Close(None)).await;
                            return;
                        }
                    },
                    frame = ws_source.next() => match frame {
                        Some(Ok(Message::Text(text))) => match ProviderEvent::from_json(&text) {
                            Ok(event) => {
                                if events.send(UpstreamEvent::Event(event)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!("Ignoring provider message: {}", e),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            break frame
                                .map(|f| format!("closed ({}): {}", u16::from(f.code), f.reason))
                                .unwrap_or_else(|| "closed".to_string());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break e.to_string(),
                        None => break "stream ended".to_string(),
                    },
                }
            };

            warn!("Provider connection lost: {}", reason);
            let _ = events.send(UpstreamEvent::Closed(reason)).await;
        });

        Ok(upstream)
    }
}
