use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::SessionBackend;
use super::config::SessionConfig;
use super::context::{CandidateContext, InterviewProfile};
use super::shared::Session;
use super::state::ConversationState;
use super::stats::SessionStats;
use super::transcript::TranscriptEntry;
use crate::audio::{AudioFramer, CaptureBackend};
use crate::errors::SessionError;
use crate::playback::{PlaybackClock, PlaybackHandle};
use crate::transport::{Connector, Transport, TransportHandle};
use crate::turn::{TurnDriver, TurnEvent};

/// How long teardown waits for each task before giving up on it
const TASK_GRACE: Duration = Duration::from_secs(5);

/// Everything a session talks to
pub struct SessionIo {
    /// Opens connections to the relay
    pub connector: Arc<dyn Connector>,
    /// Credential and persistence endpoints
    pub backend: Arc<dyn SessionBackend>,
    /// Microphone (or stand-in) samples
    pub capture: Box<dyn CaptureBackend>,
    /// Output clock the assistant's speech is scheduled on
    pub clock: Box<dyn PlaybackClock>,
}

#[derive(Default)]
struct Tasks {
    driver: Option<JoinHandle<ConversationState>>,
    transport: Option<JoinHandle<Result<(), SessionError>>>,
    pump: Option<JoinHandle<()>>,
    framer: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

/// A running voice interview
///
/// Wires capture, framing, transport, playback and the turn driver around one
/// shared [`Session`]. `end()` tears everything down.
pub struct VoiceSession {
    session: Arc<Session>,
    playback: PlaybackHandle,
    transport: TransportHandle,
    backend: Arc<dyn SessionBackend>,
    events: mpsc::Sender<TurnEvent>,
    stop_tx: Arc<watch::Sender<bool>>,
    capture: tokio::sync::Mutex<Option<Box<dyn CaptureBackend>>>,
    tasks: Mutex<Tasks>,
    ended: AtomicBool,
    persisted: AtomicBool,
}

impl VoiceSession {
    /// Fetch the credential, connect, and start streaming
    pub async fn start(
        config: SessionConfig,
        context: CandidateContext,
        profile: InterviewProfile,
        io: SessionIo,
    ) -> Result<Self, SessionError> {
        let SessionIo {
            connector,
            backend,
            mut capture,
            clock,
        } = io;

        let (session, state_tx) = Session::new(context, profile);
        info!("Starting interview session {}", session.id());

        let credential = backend
            .credential()
            .await
            .map_err(|e| SessionError::Upstream(format!("session credential unavailable: {e:#}")))?;

        let playback = PlaybackHandle::new(config.playback.clone(), clock);
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(16));
        let (stop_tx, stop_rx) = watch::channel(false);

        let driver = TurnDriver::new(
            config.watchdog,
            session.clone(),
            Arc::new(playback.clone()),
            state_tx,
        )
        .spawn(events_rx);

        let mut transport = Transport::new(
            config.transport.clone(),
            connector,
            session.clone(),
            Arc::new(playback.clone()),
            events_tx.clone(),
        );
        if let Some(credential) = credential {
            transport = transport.with_credential(credential.token);
        }
        let (transport_handle, transport_task) = transport.spawn();

        let pump = playback.spawn_pump(config.pump_interval, events_tx.clone(), stop_rx.clone());

        let voice = Self {
            session: session.clone(),
            playback: playback.clone(),
            transport: transport_handle.clone(),
            backend,
            events: events_tx.clone(),
            stop_tx: Arc::new(stop_tx),
            capture: tokio::sync::Mutex::new(None),
            tasks: Mutex::new(Tasks {
                driver: Some(driver),
                transport: Some(transport_task),
                pump: Some(pump),
                framer: None,
                watcher: None,
            }),
            ended: AtomicBool::new(false),
            persisted: AtomicBool::new(false),
        };

        let capture_rx = match capture.start().await {
            Ok(rx) => rx,
            Err(err) => {
                error!("Capture backend {} failed to start: {}", capture.name(), err);
                let _ = events_tx.send(TurnEvent::Failed(err.clone())).await;
                voice.end().await;
                return Err(err);
            }
        };
        info!("Capturing from {}", capture.name());
        *voice.capture.lock().await = Some(capture);

        let framer = AudioFramer::new(config.framer.clone());
        let outbound = transport_handle.clone();
        let framer_events = events_tx.clone();
        let framer_task = tokio::spawn(async move {
            let result = framer
                .run(capture_rx, stop_rx, move |frame| {
                    outbound.send_audio(frame);
                })
                .await;
            match result {
                Ok(frames) => debug!("Capture finished after {} frames", frames),
                Err(err) => {
                    let _ = framer_events.send(TurnEvent::Failed(err)).await;
                }
            }
        });

        let watcher = tokio::spawn(release_on_terminal(
            session,
            transport_handle,
            playback,
            voice.stop_tx.clone(),
        ));

        {
            let mut tasks = voice.tasks.lock();
            tasks.framer = Some(framer_task);
            tasks.watcher = Some(watcher);
        }

        Ok(voice)
    }

    pub fn id(&self) -> &str {
        self.session.id()
    }

    pub fn state(&self) -> ConversationState {
        self.session.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.session.subscribe()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn playback(&self) -> &PlaybackHandle {
        &self.playback
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.session.transcript()
    }

    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.session.last_error()
    }

    /// Whether the capture source ran dry (or failed)
    pub fn capture_finished(&self) -> bool {
        self.tasks
            .lock()
            .framer
            .as_ref()
            .map_or(true, |task| task.is_finished())
    }

    /// Wait until the conversation reaches `Ended` or `Error`
    pub async fn wait_for_terminal(&self) -> ConversationState {
        let mut rx = self.session.subscribe();
        let result = rx.wait_for(|state| state.is_terminal()).await.map(|s| *s);
        match result {
            Ok(state) => state,
            Err(_) => self.session.state(),
        }
    }

    /// End the interview.
    ///
    /// Disarms reconnection, stops capture and playback, closes the link with
    /// the normal code and moves the conversation to `Ended`. Every step runs
    /// even if an earlier one failed. Calling it again only returns the stats.
    pub async fn end(&self) -> SessionStats {
        if self.ended.swap(true, Ordering::SeqCst) {
            debug!("Session {} already ended", self.session.id());
            return self.session.stats();
        }

        info!("Ending interview session {}", self.session.id());

        self.transport.close();

        self.stop_tx.send_replace(true);
        if let Some(mut capture) = self.capture.lock().await.take() {
            if let Err(e) = capture.stop().await {
                warn!("Failed to stop capture backend: {}", e);
            }
        }
        let flushed = self.playback.interrupt();
        debug!("Playback stopped, {} units dropped", flushed);

        match tokio::time::timeout(TASK_GRACE, self.events.send(TurnEvent::EndRequested)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => debug!("Turn driver already stopped"),
            Err(_) => warn!("Turn driver did not accept the end request"),
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());

        if let Some(task) = tasks.transport {
            match tokio::time::timeout(TASK_GRACE, task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => debug!("Transport ended with: {}", e),
                Ok(Err(e)) => error!("Transport task panicked: {}", e),
                Err(_) => warn!("Transport did not close in time"),
            }
        }
        if let Some(task) = tasks.driver {
            match tokio::time::timeout(TASK_GRACE, task).await {
                Ok(Ok(state)) => info!("Conversation finished in {}", state),
                Ok(Err(e)) => error!("Turn driver panicked: {}", e),
                Err(_) => warn!("Turn driver did not stop in time"),
            }
        }
        for (name, task) in [("pump", tasks.pump), ("framer", tasks.framer)] {
            if let Some(task) = task {
                match tokio::time::timeout(TASK_GRACE, task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("{} task panicked: {}", name, e),
                    Err(_) => warn!("{} task did not stop in time", name),
                }
            }
        }
        if let Some(watcher) = tasks.watcher {
            watcher.abort();
        }

        self.persist().await;

        let stats = self.session.stats();
        info!(
            "Session {} ended: {} frames sent, {} received, {} interruptions",
            stats.session_id, stats.frames_sent, stats.frames_received, stats.interruptions
        );
        stats
    }

    /// Record the session with the backend, once, if the relay ever started it
    async fn persist(&self) {
        if self.persisted.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.session.relay_session_id().is_none() {
            debug!("Session never started, nothing to persist");
            return;
        }
        if let Err(e) = self.backend.persist(self.session.id()).await {
            error!("Failed to persist session {}: {:#}", self.session.id(), e);
        }
    }
}

/// Release the connection and audio as soon as the conversation is over,
/// even if nobody called `end()` yet
async fn release_on_terminal(
    session: Arc<Session>,
    transport: TransportHandle,
    playback: PlaybackHandle,
    stop_tx: Arc<watch::Sender<bool>>,
) {
    let mut rx = session.subscribe();
    let reached = rx.wait_for(|state| state.is_terminal()).await.is_ok();
    if !reached {
        return;
    }

    info!("Session {} reached {}, releasing resources", session.id(), session.state());
    transport.close();
    stop_tx.send_replace(true);
    playback.interrupt();
}
