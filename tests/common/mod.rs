// Shared fakes for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use interview_voice::audio::AudioFrame;
use interview_voice::protocol::WireMessage;
use interview_voice::relay::{
    ProviderCommand, RelayError, Upstream, UpstreamConnector, UpstreamEvent,
};
use interview_voice::session::{CandidateContext, InterviewProfile};
use interview_voice::transport::{AudioSink, Connector, Link, LinkCommand, LinkEvent};
use interview_voice::SessionError;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Generous bound on virtual time spent waiting for one message
pub const WAIT: Duration = Duration::from_secs(120);

pub fn candidate() -> CandidateContext {
    CandidateContext {
        name: "Grace Hopper".to_string(),
        major: "Computer Science".to_string(),
        year: "Graduate".to_string(),
        skills: vec!["COBOL".to_string(), "Compilers".to_string()],
        experience: "Built the first compiler".to_string(),
        education: "Yale PhD".to_string(),
        summary: "Likes making machines speak human languages".to_string(),
    }
}

pub fn profile() -> InterviewProfile {
    InterviewProfile::new("Backend Engineer")
}

/// The relay side of one accepted link
pub struct Peer {
    pub commands: mpsc::Receiver<LinkCommand>,
    pub events: mpsc::Sender<LinkEvent>,
}

impl Peer {
    pub async fn send(&self, message: impl Into<WireMessage>) {
        self.events
            .send(LinkEvent::Message(message.into()))
            .await
            .expect("client side of link alive");
    }

    pub async fn close(&self, code: u16) {
        self.events
            .send(LinkEvent::Closed {
                code,
                reason: "test".to_string(),
            })
            .await
            .expect("client side of link alive");
    }

    pub async fn next_command(&mut self) -> LinkCommand {
        tokio::time::timeout(WAIT, self.commands.recv())
            .await
            .expect("command before timeout")
            .expect("link open")
    }
}

/// Connector handing every accepted link to the test
pub struct FakeConnector {
    accept: bool,
    attempts: AtomicU32,
    peers: mpsc::UnboundedSender<Peer>,
}

impl FakeConnector {
    pub fn accepting() -> (Self, mpsc::UnboundedReceiver<Peer>) {
        Self::build(true)
    }

    pub fn refusing() -> (Self, mpsc::UnboundedReceiver<Peer>) {
        Self::build(false)
    }

    fn build(accept: bool) -> (Self, mpsc::UnboundedReceiver<Peer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                accept,
                attempts: AtomicU32::new(0),
                peers,
            },
            rx,
        )
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _credential: Option<&str>) -> Result<Link, SessionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.accept {
            return Err(SessionError::Connectivity("connection refused".to_string()));
        }

        let (link, commands, events) = Link::pair();
        let _ = self.peers.send(Peer { commands, events });
        Ok(link)
    }
}

pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<Peer>) -> Peer {
    tokio::time::timeout(WAIT, peers.recv())
        .await
        .expect("connection before timeout")
        .expect("connector alive")
}

/// Keeps every frame handed to playback
#[derive(Default)]
pub struct CollectingSink {
    pub frames: Mutex<Vec<AudioFrame>>,
}

impl AudioSink for CollectingSink {
    fn deliver(&self, frame: AudioFrame) {
        self.frames.lock().push(frame);
    }
}

/// 100ms of PCM16 at the wire rate
pub fn speech_frame(seq: u64) -> AudioFrame {
    AudioFrame::from_pcm16(vec![0x10; 4800], 24_000, seq, seq * 100)
}

/// Provider side of one relayed session
pub struct ProviderPeer {
    pub commands: mpsc::Receiver<ProviderCommand>,
    pub events: mpsc::Sender<UpstreamEvent>,
}

impl ProviderPeer {
    pub async fn next_command(&mut self) -> ProviderCommand {
        tokio::time::timeout(WAIT, self.commands.recv())
            .await
            .expect("provider command before timeout")
            .expect("relay alive")
    }
}

/// Upstream connector handing every provider connection to the test
pub struct FakeUpstream {
    accept: bool,
    attempts: AtomicU32,
    peers: mpsc::UnboundedSender<ProviderPeer>,
}

impl FakeUpstream {
    pub fn accepting() -> (Self, mpsc::UnboundedReceiver<ProviderPeer>) {
        Self::build(true)
    }

    pub fn unreachable() -> (Self, mpsc::UnboundedReceiver<ProviderPeer>) {
        Self::build(false)
    }

    fn build(accept: bool) -> (Self, mpsc::UnboundedReceiver<ProviderPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                accept,
                attempts: AtomicU32::new(0),
                peers,
            },
            rx,
        )
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamConnector for FakeUpstream {
    async fn connect(&self) -> Result<Upstream, RelayError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.accept {
            return Err(RelayError::UpstreamConnect("provider offline".to_string()));
        }

        let (upstream, commands, events) = Upstream::pair();
        let _ = self.peers.send(ProviderPeer { commands, events });
        Ok(upstream)
    }
}
