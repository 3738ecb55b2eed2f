use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::file::AudioFile;
use crate::errors::SessionError;

/// What the capture layer delivers to the framer
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Float samples in [-1.0, 1.0], mono, already at the configured rate
    Samples(Vec<f32>),
    /// The device disappeared or access was revoked
    DeviceLost(String),
}

/// Configuration for capture backends
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Rate the capture layer must deliver (the provider's rate)
    pub sample_rate: u32,
    /// Size of each delivered block in milliseconds (callback buffer size)
    pub block_duration_ms: u64,
    /// Pace file playback in real time instead of as fast as possible
    pub realtime: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: super::WIRE_SAMPLE_RATE,
            block_duration_ms: 20,
            realtime: true,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - File: read a WAV file (CLI sessions, tests)
/// - Channel: raw sample arrays pushed by an embedding capture worker
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that yields sample blocks. The channel
    /// closing means the source ended normally.
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureEvent>, SessionError>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<(), SessionError>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Capture source type
#[derive(Debug)]
pub enum CaptureSource {
    /// WAV file input
    File(PathBuf),
    /// Externally driven capture worker
    Channel(mpsc::Receiver<CaptureEvent>),
}

/// Capture backend factory
pub struct CaptureBackendFactory;

impl CaptureBackendFactory {
    pub fn create(source: CaptureSource, config: CaptureConfig) -> Box<dyn CaptureBackend> {
        match source {
            CaptureSource::File(path) => Box::new(FileCapture::new(path, config)),
            CaptureSource::Channel(rx) => Box::new(ChannelCapture::new(rx)),
        }
    }
}

/// Streams a WAV file as if it were a microphone
pub struct FileCapture {
    path: PathBuf,
    config: CaptureConfig,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl FileCapture {
    pub fn new(path: PathBuf, config: CaptureConfig) -> Self {
        Self {
            path,
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FileCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureEvent>, SessionError> {
        let audio = AudioFile::open(&self.path)
            .map_err(|e| SessionError::Device(format!("{}: {e:#}", self.path.display())))?;

        if audio.sample_rate != self.config.sample_rate {
            return Err(SessionError::Device(format!(
                "{} is {}Hz, capture must deliver {}Hz",
                self.path.display(),
                audio.sample_rate,
                self.config.sample_rate
            )));
        }

        let samples = audio.to_mono_f32();
        let block = (self.config.sample_rate as u64 * self.config.block_duration_ms / 1000).max(1) as usize;
        let pace = Duration::from_millis(self.config.block_duration_ms.max(1));
        let realtime = self.config.realtime;
        let capturing = Arc::clone(&self.capturing);
        let (tx, rx) = mpsc::channel(64);

        capturing.store(true, Ordering::SeqCst);
        info!(
            "File capture started: {} ({:.1}s)",
            self.path.display(),
            audio.duration_seconds
        );

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pace);
            for chunk in samples.chunks(block) {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }
                if realtime {
                    ticker.tick().await;
                }
                if tx.send(CaptureEvent::Samples(chunk.to_vec())).await.is_err() {
                    break;
                }
            }
            capturing.store(false, Ordering::SeqCst);
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), SessionError> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Forwards blocks from an embedder-owned capture worker
pub struct ChannelCapture {
    rx: Option<mpsc::Receiver<CaptureEvent>>,
    capturing: bool,
}

impl ChannelCapture {
    pub fn new(rx: mpsc::Receiver<CaptureEvent>) -> Self {
        Self {
            rx: Some(rx),
            capturing: false,
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for ChannelCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureEvent>, SessionError> {
        let rx = self
            .rx
            .take()
            .ok_or_else(|| SessionError::Device("capture channel already started".to_string()))?;
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), SessionError> {
        if !self.capturing {
            warn!("Channel capture stopped before it was started");
        }
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "channel"
    }
}
