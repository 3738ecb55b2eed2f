// End-to-end tests for a client session against a scripted relay

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{next_peer, FakeConnector, Peer};
use interview_voice::audio::{CaptureEvent, ChannelCapture};
use interview_voice::playback::ManualClock;
use interview_voice::protocol::{ControlMessage, Speaker, WireMessage, CLOSE_NORMAL};
use interview_voice::session::{
    ConversationState, SessionBackend, SessionConfig, SessionCredential, SessionIo, VoiceSession,
};
use interview_voice::transport::LinkCommand;
use interview_voice::SessionError;
use parking_lot::Mutex;
use tokio::sync::mpsc;

const STEP: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingBackend {
    unavailable: bool,
    persisted: Mutex<Vec<String>>,
}

#[async_trait]
impl SessionBackend for RecordingBackend {
    async fn credential(&self) -> anyhow::Result<Option<SessionCredential>> {
        if self.unavailable {
            anyhow::bail!("backend down");
        }
        Ok(Some(SessionCredential {
            token: "test-token".to_string(),
            expires_in: 60,
        }))
    }

    async fn persist(&self, session_id: &str) -> anyhow::Result<()> {
        self.persisted.lock().push(session_id.to_string());
        Ok(())
    }
}

struct Running {
    voice: VoiceSession,
    peer: Peer,
    capture: mpsc::Sender<CaptureEvent>,
    backend: Arc<RecordingBackend>,
    clock: ManualClock,
}

async fn wait_state(voice: &VoiceSession, target: ConversationState) {
    let mut rx = voice.subscribe();
    tokio::time::timeout(STEP, rx.wait_for(|state| *state == target))
        .await
        .unwrap_or_else(|_| panic!("never reached {}, stuck in {}", target, voice.state()))
        .expect("driver alive");
}

async fn start_running() -> Running {
    let (connector, mut peers) = FakeConnector::accepting();
    let backend = Arc::new(RecordingBackend::default());
    let (capture, capture_rx) = mpsc::channel(16);
    let clock = ManualClock::new();

    let io = SessionIo {
        connector: Arc::new(connector),
        backend: backend.clone(),
        capture: Box::new(ChannelCapture::new(capture_rx)),
        clock: Box::new(clock.clone()),
    };
    let voice = VoiceSession::start(
        SessionConfig::default(),
        common::candidate(),
        common::profile(),
        io,
    )
    .await
    .expect("session starts");

    let mut peer = next_peer(&mut peers).await;
    peer.send(ControlMessage::Connected).await;
    assert!(matches!(
        peer.next_command().await,
        LinkCommand::Send(WireMessage::Control(ControlMessage::StartSession { .. }))
    ));
    peer.send(ControlMessage::SessionStarted {
        session_id: "relay-9".to_string(),
    })
    .await;
    wait_state(&voice, ConversationState::AiSpeaking).await;

    Running {
        voice,
        peer,
        capture,
        backend,
        clock,
    }
}

#[tokio::test]
async fn test_barge_in_silences_interviewer() {
    let mut running = start_running().await;
    let voice = &running.voice;

    for _ in 0..5 {
        running.peer.send(WireMessage::Audio(vec![0x40; 4800])).await;
    }
    tokio::time::timeout(STEP, async {
        while voice.stats().frames_received < 5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("inbound audio delivered");
    assert!(voice.playback().is_playing() || voice.playback().queue_len() > 0);

    // The candidate talks over the interviewer
    running
        .peer
        .send(ControlMessage::SpeechStarted {
            speaker: Speaker::User,
        })
        .await;
    wait_state(voice, ConversationState::UserSpeaking).await;

    assert_eq!(voice.playback().queue_len(), 0);
    assert!(!voice.playback().is_playing());
    assert_eq!(voice.stats().interruptions, 1);
    assert_eq!(running.clock.audible_units(), 0);

    running
        .peer
        .send(ControlMessage::SpeechStopped {
            speaker: Speaker::User,
        })
        .await;
    wait_state(voice, ConversationState::Processing).await;

    running.peer.send(ControlMessage::ResponseDone).await;
    wait_state(voice, ConversationState::Listening).await;
}

#[tokio::test]
async fn test_captured_audio_is_streamed_and_end_persists() {
    let mut running = start_running().await;

    running
        .capture
        .send(CaptureEvent::Samples(vec![0.25; 2400]))
        .await
        .expect("capture alive");
    match running.peer.next_command().await {
        LinkCommand::Send(WireMessage::Audio(pcm)) => assert_eq!(pcm.len(), 4800),
        other => panic!("expected audio, got {:?}", other),
    }

    let stats = running.voice.end().await;
    match running.peer.next_command().await {
        LinkCommand::Close { code, .. } => assert_eq!(code, CLOSE_NORMAL),
        other => panic!("expected close, got {:?}", other),
    }

    assert_eq!(running.voice.state(), ConversationState::Ended);
    assert_eq!(stats.frames_sent, 1);
    assert_eq!(running.backend.persisted.lock().clone(), vec!["relay-9".to_string()]);

    // Ending twice is harmless and persists nothing more
    running.voice.end().await;
    assert_eq!(running.backend.persisted.lock().len(), 1);
}

#[tokio::test]
async fn test_lost_microphone_fails_session() {
    let mut running = start_running().await;

    running
        .capture
        .send(CaptureEvent::DeviceLost("unplugged".to_string()))
        .await
        .expect("capture alive");

    wait_state(&running.voice, ConversationState::Error).await;
    assert!(matches!(
        running.voice.last_error(),
        Some(SessionError::Device(_))
    ));

    // Resources are released without an explicit end()
    assert!(matches!(
        running.peer.next_command().await,
        LinkCommand::Close { .. }
    ));
    running.voice.end().await;
    assert_eq!(running.voice.state(), ConversationState::Error);
}

#[tokio::test]
async fn test_unavailable_credential_fails_start() {
    let (connector, _peers) = FakeConnector::accepting();
    let connector = Arc::new(connector);
    let (_capture, capture_rx) = mpsc::channel(1);

    let io = SessionIo {
        connector: connector.clone(),
        backend: Arc::new(RecordingBackend {
            unavailable: true,
            ..RecordingBackend::default()
        }),
        capture: Box::new(ChannelCapture::new(capture_rx)),
        clock: Box::new(ManualClock::new()),
    };

    let result = VoiceSession::start(
        SessionConfig::default(),
        common::candidate(),
        common::profile(),
        io,
    )
    .await;

    assert!(matches!(result, Err(SessionError::Upstream(_))));
    assert_eq!(connector.attempts(), 0);
}
