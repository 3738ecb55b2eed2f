//! PCM16 wire format conversion.
//!
//! Samples are scaled asymmetrically: negative values use the full negative
//! range (-32768) and positive values the full positive range (32767). Decoding
//! divides by the same factor per sign, so silence stays exactly zero and no DC
//! bias is introduced.

const NEG_SCALE: f32 = 32768.0;
const POS_SCALE: f32 = 32767.0;

/// Convert one float sample in [-1.0, 1.0] to signed 16-bit.
///
/// Out-of-range input is clamped; NaN maps to silence.
pub fn f32_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = sample.clamp(-1.0, 1.0);
    let scaled = if s < 0.0 { s * NEG_SCALE } else { s * POS_SCALE };
    scaled.round() as i16
}

/// Inverse of [`f32_to_i16`].
pub fn i16_to_f32(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / NEG_SCALE
    } else {
        sample as f32 / POS_SCALE
    }
}

/// Encode float samples as little-endian PCM16 bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| f32_to_i16(s).to_le_bytes())
        .collect()
}

/// Decode little-endian PCM16 bytes into float samples.
///
/// A trailing odd byte is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16_to_f32(i16::from_le_bytes([chunk[0], chunk[1]])))
        .collect()
}

/// Decode little-endian PCM16 bytes into integer samples.
pub fn pcm16_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}
