//! Outbound stream counters
//!
//! Shared between the capture callback (writer) and anything that wants a
//! snapshot. Counters reset at each streaming start so the numbers describe
//! the current stream, not the process lifetime.

use std::sync::atomic::{AtomicU64, Ordering};

/// Log a throughput line every this many frames (~10s at typical callback
/// granularity).
const LOG_EVERY_FRAMES: u64 = 100;

#[derive(Debug, Default)]
pub struct StreamStats {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sent audio frame. Called from the capture callback.
    pub fn record_frame(&self, bytes: usize) {
        let frames = self.frames_sent.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed) + bytes as u64;

        if frames % LOG_EVERY_FRAMES == 0 {
            log::debug!(
                "Audio out: {} frames, {:.1} KB",
                frames,
                total as f64 / 1024.0
            );
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Reset counters for a new stream.
    pub fn reset(&self) {
        self.frames_sent.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
    }
}
