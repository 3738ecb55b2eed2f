// Integration tests for the client transport
//
// A scripted connector stands in for the relay; time is paused so backoff
// and handshake timeouts run instantly.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{next_peer, CollectingSink, FakeConnector, WAIT};
use interview_voice::audio::AudioFrame;
use interview_voice::protocol::{ControlMessage, Speaker, WireMessage, CLOSE_NORMAL};
use interview_voice::session::Session;
use interview_voice::transport::{
    LinkCommand, RetryPolicy, Transport, TransportConfig, TransportHandle, CLOSE_ABNORMAL,
};
use interview_voice::turn::TurnEvent;
use interview_voice::SessionError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Harness {
    handle: TransportHandle,
    task: JoinHandle<Result<(), SessionError>>,
    events: mpsc::Receiver<TurnEvent>,
    session: Arc<Session>,
    sink: Arc<CollectingSink>,
}

impl Harness {
    async fn next_event(&mut self) -> TurnEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("event before timeout")
            .expect("transport alive")
    }
}

fn config(max_attempts: u32) -> TransportConfig {
    TransportConfig {
        retry: RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10), max_attempts),
        ..TransportConfig::default()
    }
}

fn start(
    config: TransportConfig,
    connector: Arc<FakeConnector>,
    context: interview_voice::session::CandidateContext,
) -> Harness {
    let (session, _state) = Session::new(context, common::profile());
    let sink = Arc::new(CollectingSink::default());
    let (events_tx, events) = mpsc::channel(64);

    let (handle, task) =
        Transport::new(config, connector, session.clone(), sink.clone(), events_tx).spawn();

    Harness {
        handle,
        task,
        events,
        session,
        sink,
    }
}

/// Walk one link through connected → start_session → session_started
async fn handshake(harness: &mut Harness, peer: &mut common::Peer, relay_id: &str) {
    peer.send(ControlMessage::Connected).await;

    match peer.next_command().await {
        LinkCommand::Send(WireMessage::Control(ControlMessage::StartSession {
            candidate_context,
            profile,
            ..
        })) => {
            assert_eq!(candidate_context, *harness.session.context());
            assert_eq!(profile, *harness.session.profile());
        }
        other => panic!("expected start_session, got {:?}", other),
    }

    peer.send(ControlMessage::SessionStarted {
        session_id: relay_id.to_string(),
    })
    .await;
    assert_eq!(
        harness.next_event().await,
        TurnEvent::Control(ControlMessage::SessionStarted {
            session_id: relay_id.to_string()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_start_session_follows_connected() {
    let (connector, mut peers) = FakeConnector::accepting();
    let mut harness = start(config(5), Arc::new(connector), common::candidate());

    assert_eq!(harness.next_event().await, TurnEvent::ConnectRequested);
    let mut peer = next_peer(&mut peers).await;

    // Nothing is sent until the relay says it is ready
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(peer.commands.try_recv().is_err());

    handshake(&mut harness, &mut peer, "relay-1").await;
    assert!(harness.handle.is_connected());

    assert!(harness.handle.send_audio(common::speech_frame(0)));
    match peer.next_command().await {
        LinkCommand::Send(WireMessage::Audio(pcm)) => assert_eq!(pcm.len(), 4800),
        other => panic!("expected audio, got {:?}", other),
    }

    harness.handle.close();
    match peer.next_command().await {
        LinkCommand::Close { code, .. } => assert_eq!(code, CLOSE_NORMAL),
        other => panic!("expected close, got {:?}", other),
    }
    assert!(harness.task.await.unwrap().is_ok());
    assert_eq!(harness.session.stats().frames_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_frames_reach_peer_in_send_order() {
    let (connector, mut peers) = FakeConnector::accepting();
    let mut harness = start(config(5), Arc::new(connector), common::candidate());

    assert_eq!(harness.next_event().await, TurnEvent::ConnectRequested);
    let mut peer = next_peer(&mut peers).await;
    handshake(&mut harness, &mut peer, "relay-1").await;

    for seq in 0..8u64 {
        let frame = AudioFrame::from_pcm16(vec![seq as u8; 4800], 24_000, seq, seq * 100);
        assert!(harness.handle.send_audio(frame));
    }

    let mut seen = Vec::new();
    for _ in 0..8 {
        match peer.next_command().await {
            LinkCommand::Send(WireMessage::Audio(pcm)) => {
                assert!(pcm.iter().all(|b| *b == pcm[0]));
                seen.push(pcm[0]);
            }
            other => panic!("expected audio, got {:?}", other),
        }
    }

    assert_eq!(seen, (0..8u8).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_audio_dropped_while_disconnected() {
    let (connector, _peers) = FakeConnector::accepting();
    let harness = start(config(5), Arc::new(connector), common::candidate());

    assert!(!harness.handle.send_audio(common::speech_frame(0)));
    assert!(!harness.handle.send_audio(common::speech_frame(1)));

    let stats = harness.session.stats();
    assert_eq!(stats.frames_dropped, 2);
    assert_eq!(stats.frames_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn test_incomplete_context_is_never_sent() {
    let (connector, mut peers) = FakeConnector::accepting();
    let mut context = common::candidate();
    context.summary = String::new();
    let mut harness = start(config(5), Arc::new(connector), context);

    assert_eq!(harness.next_event().await, TurnEvent::ConnectRequested);
    let mut peer = next_peer(&mut peers).await;
    peer.send(ControlMessage::Connected).await;

    assert_eq!(
        harness.next_event().await,
        TurnEvent::StartRefused(SessionError::InvalidContext("summary"))
    );
    assert!(peer.commands.try_recv().is_err());
    assert!(!harness.task.is_finished());
    assert!(!harness.handle.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_attempts() {
    let (connector, _peers) = FakeConnector::refusing();
    let connector = Arc::new(connector);
    let mut harness = start(config(3), connector.clone(), common::candidate());

    assert_eq!(harness.next_event().await, TurnEvent::ConnectRequested);
    assert_eq!(
        harness.next_event().await,
        TurnEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
    );
    assert_eq!(
        harness.next_event().await,
        TurnEvent::Reconnecting {
            attempt: 2,
            delay: Duration::from_secs(2)
        }
    );
    match harness.next_event().await {
        TurnEvent::Failed(SessionError::Connectivity(_)) => {}
        other => panic!("expected terminal connectivity failure, got {:?}", other),
    }

    let result = harness.task.await.unwrap();
    assert!(matches!(result, Err(SessionError::Connectivity(_))));
    assert_eq!(connector.attempts(), 3);
    assert_eq!(harness.session.stats().reconnects, 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_resends_context_and_resets_failures() {
    let (connector, mut peers) = FakeConnector::accepting();
    let connector = Arc::new(connector);
    let mut harness = start(config(5), connector.clone(), common::candidate());

    assert_eq!(harness.next_event().await, TurnEvent::ConnectRequested);
    let mut peer = next_peer(&mut peers).await;
    handshake(&mut harness, &mut peer, "relay-1").await;

    peer.close(CLOSE_ABNORMAL).await;
    assert_eq!(
        harness.next_event().await,
        TurnEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
    );
    assert!(!harness.handle.is_connected());

    let mut peer = next_peer(&mut peers).await;
    handshake(&mut harness, &mut peer, "relay-2").await;

    // A started session clears the failure count
    peer.close(CLOSE_ABNORMAL).await;
    assert_eq!(
        harness.next_event().await,
        TurnEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
    );
    assert_eq!(connector.attempts(), 2);

    harness.handle.close();
    assert!(harness.task.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_close_during_backoff_stops_retrying() {
    let (connector, mut peers) = FakeConnector::accepting();
    let connector = Arc::new(connector);
    let mut harness = start(config(5), connector.clone(), common::candidate());

    assert_eq!(harness.next_event().await, TurnEvent::ConnectRequested);
    let mut peer = next_peer(&mut peers).await;
    handshake(&mut harness, &mut peer, "relay-1").await;

    peer.close(CLOSE_ABNORMAL).await;
    assert!(matches!(
        harness.next_event().await,
        TurnEvent::Reconnecting { attempt: 1, .. }
    ));

    harness.handle.close();
    assert!(harness.task.await.unwrap().is_ok());
    assert_eq!(connector.attempts(), 1);
    assert!(!harness.handle.send_audio(common::speech_frame(0)));
}

#[tokio::test(start_paused = true)]
async fn test_silent_relay_times_out() {
    let (connector, mut peers) = FakeConnector::accepting();
    let mut harness = start(config(5), Arc::new(connector), common::candidate());

    assert_eq!(harness.next_event().await, TurnEvent::ConnectRequested);
    let mut peer = next_peer(&mut peers).await;

    let expected = SessionError::ProtocolTimeout {
        stage: "opening the connection",
        waited: Duration::from_secs(15),
    };
    assert_eq!(harness.next_event().await, TurnEvent::Failed(expected.clone()));
    assert!(matches!(peer.next_command().await, LinkCommand::Close { .. }));
    assert_eq!(harness.task.await.unwrap(), Err(expected));
}

#[tokio::test(start_paused = true)]
async fn test_relay_error_is_not_retried() {
    let (connector, mut peers) = FakeConnector::accepting();
    let connector = Arc::new(connector);
    let mut harness = start(config(5), connector.clone(), common::candidate());

    assert_eq!(harness.next_event().await, TurnEvent::ConnectRequested);
    let mut peer = next_peer(&mut peers).await;
    handshake(&mut harness, &mut peer, "relay-1").await;

    let error = ControlMessage::Error {
        message: "provider unavailable".to_string(),
    };
    peer.send(error.clone()).await;

    assert_eq!(harness.next_event().await, TurnEvent::Control(error));
    assert!(matches!(peer.next_command().await, LinkCommand::Close { .. }));
    assert_eq!(
        harness.task.await.unwrap(),
        Err(SessionError::Upstream("provider unavailable".to_string()))
    );
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_normal_close_ends_session() {
    let (connector, mut peers) = FakeConnector::accepting();
    let mut harness = start(config(5), Arc::new(connector), common::candidate());

    assert_eq!(harness.next_event().await, TurnEvent::ConnectRequested);
    let mut peer = next_peer(&mut peers).await;
    handshake(&mut harness, &mut peer, "relay-1").await;

    peer.close(CLOSE_NORMAL).await;
    assert_eq!(
        harness.next_event().await,
        TurnEvent::Control(ControlMessage::SessionEnded)
    );
    assert!(harness.task.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_inbound_audio_reaches_playback() {
    let (connector, mut peers) = FakeConnector::accepting();
    let mut harness = start(config(5), Arc::new(connector), common::candidate());

    assert_eq!(harness.next_event().await, TurnEvent::ConnectRequested);
    let mut peer = next_peer(&mut peers).await;
    handshake(&mut harness, &mut peer, "relay-1").await;

    peer.send(ControlMessage::SpeechStarted {
        speaker: Speaker::Ai,
    })
    .await;
    peer.send(WireMessage::Audio(vec![0x20; 4800])).await;
    peer.send(WireMessage::Audio(vec![0x20; 2400])).await;

    assert_eq!(
        harness.next_event().await,
        TurnEvent::Control(ControlMessage::SpeechStarted {
            speaker: Speaker::Ai
        })
    );
    assert_eq!(harness.next_event().await, TurnEvent::ProviderAudio);
    assert_eq!(harness.next_event().await, TurnEvent::ProviderAudio);

    let positions: Vec<(u64, u64)> = harness
        .sink
        .frames
        .lock()
        .iter()
        .map(|f| (f.sequence(), f.timestamp_ms()))
        .collect();
    assert_eq!(positions, vec![(0, 0), (1, 100)]);
    assert_eq!(harness.session.stats().frames_received, 2);
}

#[tokio::test(start_paused = true)]
async fn test_three_abnormal_closes_exhaust_three_attempts() {
    let (connector, mut peers) = FakeConnector::accepting();
    let connector = Arc::new(connector);
    let mut harness = start(config(3), connector.clone(), common::candidate());

    assert_eq!(harness.next_event().await, TurnEvent::ConnectRequested);
    for attempt in 1..=3u32 {
        let peer = next_peer(&mut peers).await;
        peer.close(CLOSE_ABNORMAL).await;

        if attempt < 3 {
            assert!(matches!(
                harness.next_event().await,
                TurnEvent::Reconnecting { attempt: a, .. } if a == attempt
            ));
        }
    }

    assert!(matches!(
        harness.next_event().await,
        TurnEvent::Failed(SessionError::Connectivity(_))
    ));
    assert!(harness.task.await.unwrap().is_err());
    assert_eq!(connector.attempts(), 3);
    assert!(peers.try_recv().is_err());
}
