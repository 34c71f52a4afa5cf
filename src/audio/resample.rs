//! Box-filter downsampler for capture-rate to wire-rate conversion
//!
//! Each output sample is the arithmetic mean of the source samples falling
//! in its time window. Stateless: every call operates on one self-contained
//! block, so no anti-aliasing filter memory is carried across blocks. Good
//! enough for speech-bandwidth transport, not spectrally correct above the
//! target Nyquist.

/// Resample a mono block of normalized samples to `target_rate`.
///
/// Returns the block unchanged when the rates already match. Otherwise the
/// output length is `floor(len / (input_rate / target_rate))`; a trailing
/// partial window is dropped by the floor division.
pub fn resample(samples: &[f32], input_rate: u32, target_rate: u32) -> Vec<f32> {
    // Guard against degenerate rates
    if input_rate == 0 || target_rate == 0 {
        log::warn!(
            "Invalid sample rate (input: {}, target: {}), returning block unchanged",
            input_rate,
            target_rate
        );
        return samples.to_vec();
    }

    if input_rate == target_rate {
        return samples.to_vec();
    }

    let ratio = input_rate as f64 / target_rate as f64;
    let new_len = (samples.len() as f64 / ratio) as usize;
    let mut out = Vec::with_capacity(new_len);

    let mut offset = 0usize;
    for i in 0..new_len {
        let next_offset = ((i + 1) as f64 * ratio) as usize;
        let end = next_offset.min(samples.len());
        let window = &samples[offset.min(end)..end];

        if window.is_empty() {
            out.push(0.0);
        } else {
            // Accumulate in f64 so long windows don't lose precision
            let sum: f64 = window.iter().map(|&s| s as f64).sum();
            out.push((sum / window.len() as f64) as f32);
        }

        offset = next_offset;
    }

    out
}
