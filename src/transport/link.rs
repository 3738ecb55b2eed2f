//! One physical connection to the relay
//!
//! A [`Link`] is a pair of channels in front of a socket task. The client
//! never sees the socket itself, which lets tests substitute a scripted
//! [`Connector`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::errors::SessionError;
use crate::protocol::{ControlMessage, WireMessage};

/// Close code reported when the connection dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Capacity of the per-link channels
const LINK_BUFFER: usize = 64;

/// What the client asks the socket task to do
#[derive(Debug)]
pub enum LinkCommand {
    Send(WireMessage),
    Close { code: u16, reason: String },
}

/// What the socket task reports
#[derive(Debug)]
pub enum LinkEvent {
    Message(WireMessage),
    Closed { code: u16, reason: String },
}

/// An open connection
#[derive(Debug)]
pub struct Link {
    pub outgoing: mpsc::Sender<LinkCommand>,
    pub incoming: mpsc::Receiver<LinkEvent>,
}

impl Link {
    /// Build both ends of a link; the second half belongs to whoever plays
    /// the socket.
    pub fn pair() -> (Link, mpsc::Receiver<LinkCommand>, mpsc::Sender<LinkEvent>) {
        let (outgoing, commands) = mpsc::channel(LINK_BUFFER);
        let (events, incoming) = mpsc::channel(LINK_BUFFER);
        (Link { outgoing, incoming }, commands, events)
    }
}

/// Opens links to the relay
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect, presenting `credential` as a bearer token when given.
    /// Failures are reported as `Connectivity`.
    async fn connect(&self, credential: Option<&str>) -> Result<Link, SessionError>;
}

/// WebSocket connector used against a real relay
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, credential: Option<&str>) -> Result<Link, SessionError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::Connectivity(format!("invalid relay url: {e}")))?;

        if let Some(token) = credential {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SessionError::Connectivity(format!("invalid credential: {e}")))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| SessionError::Connectivity(e.to_string()))?;
        info!("Connected to relay at {}", self.url);

        let (link, mut commands, events) = Link::pair();
        let (mut ws_sink, mut ws_source) = ws_stream.split();

        tokio::spawn(async move {
            let (code, reason) = loop {
                tokio::select! {
                    command = commands.recv() => match command {
                        Some(LinkCommand::Send(message)) => {
                            let frame = match to_ws_message(message) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    warn!("Dropping unencodable message: {}", e);
                                    continue;
                                }
                            };
                            if let Err(e) = ws_sink.send(frame).await {
                                warn!("Relay send failed: {}", e);
                                break (CLOSE_ABNORMAL, e.to_string());
                            }
                        }
                        Some(LinkCommand::Close { code, reason }) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.clone().into(),
                            };
                            if let Err(e) = ws_sink.send(Message::Close(Some(frame))).await {
                                debug!("Close frame not delivered: {}", e);
                            }
                            break (code, reason);
                        }
                        None => break (CLOSE_ABNORMAL, "link dropped".to_string()),
                    },
                    frame = ws_source.next() => match frame {
                        Some(Ok(Message::Text(text))) => match ControlMessage::from_json(&text) {
                            Ok(message) => {
                                if events.send(LinkEvent::Message(message.into())).await.is_err() {
                                    break (CLOSE_ABNORMAL, "client gone".to_string());
                                }
                            }
                            Err(e) => warn!("Ignoring malformed control message: {}", e),
                        },
                        Some(Ok(Message::Binary(data))) => {
                            if events.send(LinkEvent::Message(WireMessage::Audio(data))).await.is_err() {
                                break (CLOSE_ABNORMAL, "client gone".to_string());
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break match frame {
                                Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                                None => (CLOSE_ABNORMAL, String::new()),
                            };
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break (CLOSE_ABNORMAL, e.to_string()),
                        None => break (CLOSE_ABNORMAL, "stream ended".to_string()),
                    },
                }
            };

            debug!("Relay link closed ({}): {}", code, reason);
            let _ = events.send(LinkEvent::Closed { code, reason }).await;
        });

        Ok(link)
    }
}

fn to_ws_message(message: WireMessage) -> Result<Message, SessionError> {
    match message {
        WireMessage::Control(control) => Ok(Message::Text(control.to_json()?)),
        WireMessage::Audio(pcm) => Ok(Message::Binary(pcm)),
    }
}
