use super::pcm;

/// Sample rate the upstream provider requires for both directions.
pub const WIRE_SAMPLE_RATE: u32 = 24_000;

/// Wire encoding of frame payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    /// Signed 16-bit little-endian PCM
    Pcm16,
}

/// One fixed-duration block of mono PCM16 audio.
///
/// Frames are immutable once built and deliberately not `Clone`: each frame is
/// consumed exactly once, either by the transport (outbound) or by the playback
/// scheduler (inbound).
#[derive(Debug, PartialEq, Eq)]
pub struct AudioFrame {
    /// Raw PCM16 little-endian bytes
    pcm: Vec<u8>,
    /// Sample rate in Hz
    sample_rate: u32,
    /// Number of channels (always 1 on the wire)
    channels: u16,
    /// Payload encoding
    encoding: AudioEncoding,
    /// Position in the producing stream
    sequence: u64,
    /// Offset of the first sample since the stream started
    timestamp_ms: u64,
}

impl AudioFrame {
    /// Build a mono PCM16 frame from wire bytes.
    pub fn from_pcm16(pcm: Vec<u8>, sample_rate: u32, sequence: u64, timestamp_ms: u64) -> Self {
        Self {
            pcm,
            sample_rate,
            channels: 1,
            encoding: AudioEncoding::Pcm16,
            sequence,
            timestamp_ms,
        }
    }

    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    /// Hand over the payload bytes, consuming the frame.
    pub fn into_pcm(self) -> Vec<u8> {
        self.pcm
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn encoding(&self) -> AudioEncoding {
        self.encoding
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.sample_count() as u64 * 1000 / self.sample_rate as u64
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.len() < 2
    }

    /// Decode the payload back to float samples for rendering.
    pub fn to_f32(&self) -> Vec<f32> {
        pcm::decode_pcm16(&self.pcm)
    }
}
