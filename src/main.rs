use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use interview_voice::audio::{
    CaptureBackendFactory, CaptureConfig, CaptureSource, WavRecorder,
};
use interview_voice::playback::RecordingClock;
use interview_voice::relay::RealtimeConnector;
use interview_voice::session::{
    CandidateContext, ConversationState, Difficulty, HttpSessionBackend, InterviewProfile,
    NoopBackend, SessionBackend, SessionIo, VoiceSession,
};
use interview_voice::transport::WebSocketConnector;
use interview_voice::{create_router, AppState, Config};
use parking_lot::Mutex;
use tracing::{info, warn};

/// How long the conversation must sit idle after the input ran dry before the
/// CLI ends it
const IDLE_GRACE: Duration = Duration::from_secs(3);
const IDLE_POLL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "interview-voice", version, about = "Real-time voice interview client and relay")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(short, long, global = true, default_value = "config/interview-voice")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay: accept interview clients and bridge them to the provider
    Serve,
    /// Run one interview, speaking a WAV file and recording the replies
    Interview {
        /// Candidate speech (WAV, the provider's sample rate)
        #[arg(short, long)]
        input: PathBuf,
        /// Where the interviewer's speech is recorded
        #[arg(short, long, default_value = "interview-playback.wav")]
        output: PathBuf,
        /// Candidate context as JSON
        #[arg(long)]
        candidate: PathBuf,
        /// Role the candidate is interviewing for
        #[arg(short, long)]
        role: String,
        #[arg(short, long, default_value = "medium")]
        difficulty: Difficulty,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Interview {
            input,
            output,
            candidate,
            role,
            difficulty,
        } => {
            let raw = std::fs::read_to_string(&candidate)
                .with_context(|| format!("Failed to read {}", candidate.display()))?;
            let context: CandidateContext = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid candidate context in {}", candidate.display()))?;
            let profile = InterviewProfile { role, difficulty };
            interview(cfg, context, profile, input, output).await
        }
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let realtime = cfg.realtime_config();
    if realtime.api_key.is_none() {
        warn!(
            "{} is not set, provider connections will be unauthenticated",
            cfg.provider.api_key_env
        );
    }

    let state = AppState::new(
        Arc::new(RealtimeConnector::new(realtime)),
        cfg.relay_config(),
    );
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Relay listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down relay");
        })
        .await?;

    Ok(())
}

async fn interview(
    cfg: Config,
    context: CandidateContext,
    profile: InterviewProfile,
    input: PathBuf,
    output: PathBuf,
) -> Result<()> {
    let sample_rate = cfg.audio.sample_rate;
    let recorder = WavRecorder::create(&output, sample_rate)?;
    let clock = Arc::new(Mutex::new(RecordingClock::new(recorder, sample_rate)));

    let capture = CaptureBackendFactory::create(
        CaptureSource::File(input),
        CaptureConfig {
            sample_rate,
            ..CaptureConfig::default()
        },
    );
    let backend: Arc<dyn SessionBackend> = match &cfg.backend.base_url {
        Some(url) => Arc::new(HttpSessionBackend::new(url.clone())),
        None => Arc::new(NoopBackend),
    };

    let io = SessionIo {
        connector: Arc::new(WebSocketConnector::new(cfg.transport.relay_url.clone())),
        backend,
        capture,
        clock: Box::new(clock.clone()),
    };

    let session = VoiceSession::start(cfg.session_config(), context, profile, io).await?;
    info!("Interview {} started against {}", session.id(), cfg.transport.relay_url);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let terminal = session.wait_for_terminal();
    tokio::pin!(terminal);
    let mut ticker = tokio::time::interval(IDLE_POLL);
    let mut idle_for = Duration::ZERO;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, ending interview");
                break;
            }
            state = &mut terminal => {
                info!("Conversation reached {}", state);
                break;
            }
            _ = ticker.tick() => {
                let idle = session.capture_finished()
                    && session.state() == ConversationState::Listening
                    && !session.playback().is_playing();
                idle_for = if idle { idle_for + IDLE_POLL } else { Duration::ZERO };
                if idle_for >= IDLE_GRACE {
                    info!("Input finished and the interviewer is done, ending interview");
                    break;
                }
            }
        }
    }

    let stats = session.end().await;
    if let Some(err) = session.last_error() {
        warn!("Interview ended with error: {}", err.user_message());
    }

    let samples = clock.lock().finish()?;
    info!(
        "Recorded {:.1}s of interviewer speech to {}",
        samples as f64 / sample_rate as f64,
        output.display()
    );

    println!("{}", serde_json::to_string_pretty(&stats)?);
    for entry in session.transcript() {
        println!("{:>4}: {}", entry.speaker.as_str(), entry.text);
    }

    Ok(())
}
