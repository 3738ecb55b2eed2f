use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::link::{Connector, Link, LinkCommand, LinkEvent};
use super::retry::RetryPolicy;
use super::AudioSink;
use crate::audio::{AudioFrame, WIRE_SAMPLE_RATE};
use crate::errors::SessionError;
use crate::protocol::{ControlMessage, WireMessage, CLOSE_NORMAL};
use crate::session::Session;
use crate::turn::TurnEvent;

/// Transport settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub retry: RetryPolicy,

    /// How long the relay may stay silent during the handshake
    pub start_timeout: Duration,

    /// Outbound audio frames buffered while connected; excess is dropped
    pub outbound_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            start_timeout: Duration::from_secs(15),
            outbound_capacity: 32,
        }
    }
}

/// How one connection ended
#[derive(Debug)]
enum Disconnect {
    /// `close()` was called; no retry
    UserClosed,
    /// The relay closed normally without saying why
    PeerEnded,
    /// `session_ended` was received and forwarded
    Finished,
    /// Abnormal close or connect failure; eligible for retry
    Abnormal(SessionError),
    /// Not retried; the turn controller still has to hear about it
    Fatal(SessionError),
    /// Not retried; already forwarded to the turn controller
    Reported(SessionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitConnected,
    AwaitStarted,
    Refused,
    Active,
}

impl Phase {
    fn stage(&self) -> &'static str {
        match self {
            Phase::AwaitConnected => "opening the connection",
            _ => "starting the session",
        }
    }
}

/// Cheap handle used by the capture side and by teardown
#[derive(Clone)]
pub struct TransportHandle {
    audio_tx: mpsc::Sender<AudioFrame>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
    session: Arc<Session>,
}

impl TransportHandle {
    /// Queue one outbound frame. Never waits: the frame is dropped when the
    /// link is down or the outbound buffer is full.
    pub fn send_audio(&self, frame: AudioFrame) -> bool {
        if !self.connected.load(Ordering::Acquire) || self.is_closed() {
            self.session.record_dropped();
            return false;
        }

        match self.audio_tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.session.record_dropped();
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Disarm reconnection, then close the link with the normal code.
    /// Idempotent.
    pub fn close(&self) {
        if !self.shutdown.send_replace(true) {
            info!("Closing transport for {}", self.session.id());
        }
        self.connected.store(false, Ordering::Release);
    }
}

/// Owns the connection to the relay for one session
pub struct Transport {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    session: Arc<Session>,
    sink: Arc<dyn AudioSink>,
    events: mpsc::Sender<TurnEvent>,
    credential: Option<String>,
    inbound_sequence: u64,
    inbound_position_ms: u64,
}

impl Transport {
    pub fn new(
        config: TransportConfig,
        connector: Arc<dyn Connector>,
        session: Arc<Session>,
        sink: Arc<dyn AudioSink>,
        events: mpsc::Sender<TurnEvent>,
    ) -> Self {
        Self {
            config,
            connector,
            session,
            sink,
            events,
            credential: None,
            inbound_sequence: 0,
            inbound_position_ms: 0,
        }
    }

    /// Bearer token presented on every connect
    pub fn with_credential(mut self, token: impl Into<String>) -> Self {
        self.credential = Some(token.into());
        self
    }

    /// Start the connection task.
    ///
    /// The task resolves to `Ok` after a user close or a normal end of the
    /// session, and to the terminal error otherwise.
    pub fn spawn(self) -> (TransportHandle, JoinHandle<Result<(), SessionError>>) {
        let (audio_tx, audio_rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));

        let handle = TransportHandle {
            audio_tx,
            connected: connected.clone(),
            shutdown: Arc::new(shutdown_tx),
            session: self.session.clone(),
        };

        let task = tokio::spawn(self.run(audio_rx, shutdown_rx, connected));
        (handle, task)
    }

    async fn run(
        mut self,
        mut audio_rx: mpsc::Receiver<AudioFrame>,
        mut shutdown: watch::Receiver<bool>,
        connected: Arc<AtomicBool>,
    ) -> Result<(), SessionError> {
        self.notify(TurnEvent::ConnectRequested).await;
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            debug!("Connecting to relay (consecutive failures: {})", failures);
            let connect = tokio::select! {
                result = self.connector.connect(self.credential.as_deref()) => result,
                _ = closed(&mut shutdown) => return Ok(()),
            };

            let outcome = match connect {
                Ok(link) => {
                    self.drive(link, &mut audio_rx, &mut shutdown, &connected, &mut failures)
                        .await
                }
                Err(e) => Disconnect::Abnormal(e),
            };
            connected.store(false, Ordering::Release);

            match outcome {
                Disconnect::UserClosed => {
                    info!("Transport closed by user");
                    return Ok(());
                }
                Disconnect::PeerEnded => {
                    info!("Relay ended the session");
                    self.notify(TurnEvent::Control(ControlMessage::SessionEnded))
                        .await;
                    return Ok(());
                }
                Disconnect::Finished => {
                    info!("Session ended");
                    return Ok(());
                }
                Disconnect::Fatal(err) => {
                    error!("Transport failed: {}", err);
                    self.notify(TurnEvent::Failed(err.clone())).await;
                    return Err(err);
                }
                Disconnect::Reported(err) => return Err(err),
                Disconnect::Abnormal(err) => {
                    failures += 1;
                    let Some(delay) = self.config.retry.delay_after(failures) else {
                        let err = SessionError::Connectivity(format!(
                            "gave up after {failures} failed connections, last error: {err}"
                        ));
                        error!("{}", err);
                        self.notify(TurnEvent::Failed(err.clone())).await;
                        return Err(err);
                    };

                    warn!(
                        "Connection lost ({}), retry {} in {}ms",
                        err,
                        failures,
                        delay.as_millis()
                    );
                    self.session.record_reconnect();
                    self.notify(TurnEvent::Reconnecting {
                        attempt: failures,
                        delay,
                    })
                    .await;

                    let mut stale = 0usize;
                    while audio_rx.try_recv().is_ok() {
                        stale += 1;
                        self.session.record_dropped();
                    }
                    if stale > 0 {
                        debug!("Dropped {} stale outbound frames", stale);
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = closed(&mut shutdown) => return Ok(()),
                    }
                }
            }
        }
    }

    /// Run one connection until it ends
    async fn drive(
        &mut self,
        mut link: Link,
        audio_rx: &mut mpsc::Receiver<AudioFrame>,
        shutdown: &mut watch::Receiver<bool>,
        connected: &AtomicBool,
        failures: &mut u32,
    ) -> Disconnect {
        let mut phase = Phase::AwaitConnected;
        let mut deadline = Instant::now() + self.config.start_timeout;

        loop {
            tokio::select! {
                biased;

                _ = closed(shutdown) => {
                    connected.store(false, Ordering::Release);
                    close_link(&link, CLOSE_NORMAL, "session ended").await;
                    return Disconnect::UserClosed;
                }

                event = link.incoming.recv() => {
                    let message = match event {
                        Some(LinkEvent::Message(message)) => message,
                        Some(LinkEvent::Closed { code, reason }) => {
                            connected.store(false, Ordering::Release);
                            if code == CLOSE_NORMAL {
                                return Disconnect::PeerEnded;
                            }
                            return Disconnect::Abnormal(SessionError::Connectivity(format!(
                                "relay closed with code {code}: {reason}"
                            )));
                        }
                        None => {
                            return Disconnect::Abnormal(SessionError::Connectivity(
                                "link dropped".to_string(),
                            ));
                        }
                    };

                    match message {
                        WireMessage::Control(ControlMessage::Connected) => {
                            if phase != Phase::AwaitConnected {
                                debug!("Duplicate connected message ignored");
                                continue;
                            }
                            match self.start_session(&link).await {
                                Ok(()) => {
                                    phase = Phase::AwaitStarted;
                                    deadline = Instant::now() + self.config.start_timeout;
                                }
                                Err(Some(err)) => {
                                    warn!("Refusing to start session: {}", err);
                                    self.notify(TurnEvent::StartRefused(err)).await;
                                    phase = Phase::Refused;
                                }
                                Err(None) => {
                                    return Disconnect::Abnormal(SessionError::Connectivity(
                                        "link closed during handshake".to_string(),
                                    ));
                                }
                            }
                        }
                        WireMessage::Control(control) => {
                            if phase == Phase::AwaitConnected {
                                return Disconnect::Fatal(SessionError::Protocol(format!(
                                    "{} received before connected",
                                    control.kind()
                                )));
                            }
                            if phase == Phase::AwaitStarted {
                                if matches!(control, ControlMessage::SessionStarted { .. }) {
                                    *failures = 0;
                                }
                                phase = Phase::Active;
                                connected.store(true, Ordering::Release);
                                info!("Session active on relay");
                            }

                            let terminal = match &control {
                                ControlMessage::Error { message } => {
                                    Some(SessionError::Upstream(message.clone()))
                                }
                                _ => None,
                            };
                            let ended = matches!(control, ControlMessage::SessionEnded);

                            self.notify(TurnEvent::Control(control)).await;

                            if let Some(err) = terminal {
                                connected.store(false, Ordering::Release);
                                close_link(&link, CLOSE_NORMAL, "session failed").await;
                                return Disconnect::Reported(err);
                            }
                            if ended {
                                connected.store(false, Ordering::Release);
                                close_link(&link, CLOSE_NORMAL, "session ended").await;
                                return Disconnect::Finished;
                            }
                        }
                        WireMessage::Audio(pcm) => {
                            if phase == Phase::AwaitConnected || phase == Phase::Refused {
                                debug!("Ignoring audio before the session started");
                                continue;
                            }
                            if phase == Phase::AwaitStarted {
                                phase = Phase::Active;
                                connected.store(true, Ordering::Release);
                            }
                            self.deliver(pcm);
                        }
                    }
                }

                frame = audio_rx.recv(), if phase == Phase::Active => {
                    let Some(frame) = frame else {
                        close_link(&link, CLOSE_NORMAL, "session ended").await;
                        return Disconnect::UserClosed;
                    };
                    let command = LinkCommand::Send(WireMessage::Audio(frame.into_pcm()));
                    if link.outgoing.send(command).await.is_err() {
                        return Disconnect::Abnormal(SessionError::Connectivity(
                            "link closed while sending".to_string(),
                        ));
                    }
                    self.session.record_sent();
                }

                _ = tokio::time::sleep_until(deadline), if phase == Phase::AwaitConnected || phase == Phase::AwaitStarted => {
                    let err = SessionError::ProtocolTimeout {
                        stage: phase.stage(),
                        waited: self.config.start_timeout,
                    };
                    close_link(&link, CLOSE_NORMAL, "handshake timed out").await;
                    return Disconnect::Fatal(err);
                }
            }
        }
    }

    /// Send `start_session` once `connected` arrived.
    ///
    /// `Err(Some)` means the context is incomplete and nothing was sent;
    /// `Err(None)` means the link is gone.
    async fn start_session(&self, link: &Link) -> Result<(), Option<SessionError>> {
        self.session.context().validate().map_err(Some)?;
        self.session.profile().validate().map_err(Some)?;

        let message = ControlMessage::StartSession {
            candidate_context: self.session.context().clone(),
            profile: self.session.profile().clone(),
            prior_turns: self.session.prior_turns(),
        };
        debug!("Sending start_session for {}", self.session.id());
        link.outgoing
            .send(LinkCommand::Send(message.into()))
            .await
            .map_err(|_| None)
    }

    fn deliver(&mut self, pcm: Vec<u8>) {
        let frame = AudioFrame::from_pcm16(
            pcm,
            WIRE_SAMPLE_RATE,
            self.inbound_sequence,
            self.inbound_position_ms,
        );
        if frame.is_empty() {
            return;
        }
        self.inbound_sequence += 1;
        self.inbound_position_ms += frame.duration_ms();

        self.session.record_received();
        self.sink.deliver(frame);
        if self.events.try_send(TurnEvent::ProviderAudio).is_err() {
            debug!("Turn controller busy, audio activity not reported");
        }
    }

    async fn notify(&self, event: TurnEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Turn controller gone, event dropped");
        }
    }
}

/// Resolves once `close()` was called or every handle is gone
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

async fn close_link(link: &Link, code: u16, reason: &str) {
    let command = LinkCommand::Close {
        code,
        reason: reason.to_string(),
    };
    if link.outgoing.send(command).await.is_err() {
        debug!("Link already closed");
    }
}
