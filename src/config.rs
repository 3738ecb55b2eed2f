use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::audio::FramerConfig;
use crate::playback::PlaybackConfig;
use crate::relay::{RealtimeConfig, RelayConfig};
use crate::session::SessionConfig;
use crate::transport::{RetryPolicy, TransportConfig};

/// Prefix of environment overrides, e.g. `INTERVIEW__TRANSPORT__MAX_ATTEMPTS=3`
const ENV_PREFIX: &str = "INTERVIEW";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub transport: TransportSettings,
    pub turn: TurnSettings,
    pub playback: PlaybackSettings,
    pub provider: ProviderConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "interview-voice".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Wire sample rate required by the provider
    pub sample_rate: u32,
    pub frame_duration_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        let framer = FramerConfig::default();
        Self {
            sample_rate: framer.sample_rate,
            frame_duration_ms: framer.frame_duration_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub relay_url: String,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub start_timeout_secs: u64,
    pub outbound_capacity: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8080/ws".to_string(),
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            max_attempts: 5,
            start_timeout_secs: 15,
            outbound_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TurnSettings {
    pub watchdog_secs: u64,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self { watchdog_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub capacity: usize,
    pub min_unit_ms: u64,
    pub max_accumulated_frames: usize,
    pub drift_threshold_ms: u64,
    pub reset_epsilon_ms: u64,
    pub lookahead_ms: u64,
    pub pump_interval_ms: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            capacity: 50,
            min_unit_ms: 20,
            max_accumulated_frames: 2,
            drift_threshold_ms: 100,
            reset_epsilon_ms: 10,
            lookahead_ms: 200,
            pump_interval_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub url: String,
    pub model: String,
    pub voice: String,
    /// Environment variable holding the provider API key
    pub api_key_env: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime".to_string(),
            model: "gpt-4o-realtime-preview".to_string(),
            voice: "alloy".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Product backend serving the credential and persistence endpoints
    pub base_url: Option<String>,
}

impl Config {
    /// Load `path` (any format the `config` crate knows, extension optional)
    /// plus `INTERVIEW__*` environment overrides. A missing file means
    /// defaults.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {path}"))?;

        let cfg: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.framer_config()
            .validate()
            .map_err(anyhow::Error::msg)
            .context("audio")?;
        self.retry_policy()
            .validate()
            .map_err(anyhow::Error::msg)
            .context("transport")?;

        if self.audio.sample_rate == 0 {
            bail!("audio.sample_rate must be positive");
        }
        if self.transport.outbound_capacity == 0 {
            bail!("transport.outbound_capacity must be positive");
        }
        if self.transport.start_timeout_secs == 0 {
            bail!("transport.start_timeout_secs must be positive");
        }
        if self.turn.watchdog_secs == 0 {
            bail!("turn.watchdog_secs must be positive");
        }
        if self.playback.capacity == 0 || self.playback.max_accumulated_frames == 0 {
            bail!("playback.capacity and playback.max_accumulated_frames must be positive");
        }
        if self.playback.pump_interval_ms == 0 {
            bail!("playback.pump_interval_ms must be positive");
        }
        Ok(())
    }

    pub fn framer_config(&self) -> FramerConfig {
        FramerConfig {
            sample_rate: self.audio.sample_rate,
            frame_duration_ms: self.audio.frame_duration_ms,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.transport.base_delay_ms),
            Duration::from_millis(self.transport.max_delay_ms),
            self.transport.max_attempts,
        )
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        let p = &self.playback;
        PlaybackConfig {
            sample_rate: self.audio.sample_rate,
            capacity: p.capacity,
            min_unit: Duration::from_millis(p.min_unit_ms),
            max_accumulated_frames: p.max_accumulated_frames,
            drift_threshold: Duration::from_millis(p.drift_threshold_ms),
            reset_epsilon: Duration::from_millis(p.reset_epsilon_ms),
            lookahead: Duration::from_millis(p.lookahead_ms),
        }
    }

    /// Settings for a client-side session
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            framer: self.framer_config(),
            transport: TransportConfig {
                retry: self.retry_policy(),
                start_timeout: Duration::from_secs(self.transport.start_timeout_secs),
                outbound_capacity: self.transport.outbound_capacity,
            },
            playback: self.playback_config(),
            watchdog: Duration::from_secs(self.turn.watchdog_secs),
            pump_interval: Duration::from_millis(self.playback.pump_interval_ms),
            ..SessionConfig::default()
        }
    }

    /// Settings for the server-side relay
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            start_timeout: Duration::from_secs(self.transport.start_timeout_secs),
            voice: self.provider.voice.clone(),
        }
    }

    /// Provider connection settings; the API key is read from the environment
    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            url: self.provider.url.clone(),
            model: self.provider.model.clone(),
            voice: self.provider.voice.clone(),
            api_key: std::env::var(&self.provider.api_key_env).ok(),
        }
    }
}
