//! Audio pipeline: microphone capture, rate conversion, PCM encoding
//!
//! The capture callback runs the whole outbound path synchronously:
//! downmix -> resample to the wire rate -> PCM16LE encode -> frame send.

pub mod capture;
pub mod pcm;
pub mod resample;

pub use capture::{start_capture, CaptureError, CaptureHandle, TeardownReport};
pub use pcm::{encode_pcm16le, sample_to_i16};
pub use resample::resample;
