//! Normalized-float to PCM16LE conversion for the wire format

/// Convert one normalized sample to a signed 16-bit value.
///
/// The input is clamped to [-1, 1] first. Negative values scale by 32768
/// and non-negative ones by 32767, which maps the endpoints onto the exact
/// two's-complement i16 range without overflowing at +1.0.
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encode a block of normalized samples as little-endian PCM16 bytes.
///
/// Pure function; the output is always exactly `2 * samples.len()` bytes.
pub fn encode_pcm16le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    out
}
