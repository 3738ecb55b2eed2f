use std::time::Duration;

use crate::audio::FramerConfig;
use crate::playback::PlaybackConfig;
use crate::transport::TransportConfig;
use crate::turn::DEFAULT_WATCHDOG;

/// Configuration for one client-side interview session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Outbound framing (the provider's wire rate)
    pub framer: FramerConfig,

    /// Connection, handshake and reconnect settings
    pub transport: TransportConfig,

    /// Inbound speech scheduling
    pub playback: PlaybackConfig,

    /// How long the assistant may hold the floor without a completion signal
    pub watchdog: Duration,

    /// Tick of the playback pump
    pub pump_interval: Duration,

    /// Capacity of the turn event channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            framer: FramerConfig::default(),
            transport: TransportConfig::default(),
            playback: PlaybackConfig::default(),
            watchdog: DEFAULT_WATCHDOG,
            pump_interval: Duration::from_millis(10),
            event_capacity: 256,
        }
    }
}
