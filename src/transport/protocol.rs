//! Wire protocol for the voice-pipeline backend
//!
//! One WebSocket carries two outbound payload kinds: JSON control frames
//! (tagged by `type`) and raw binary PCM16LE audio frames. Inbound frames
//! are always JSON events tagged by `type`.
//!
//! # Session Flow
//!
//! 1. Socket opens; the client sends `start` with the session configuration
//! 2. Backend replies `ready`/`started` and allocates its pipeline
//! 3. Client streams binary audio frames (16kHz mono PCM16LE)
//! 4. Backend pushes `stt_*` and `llm_*` events as they happen
//! 5. Client sends `end` to tear the backend pipeline down

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::settings::SessionConfig;

/// Sample rate the backend expects on the wire.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Channel count on the wire (mono).
pub const TARGET_CHANNELS: u16 = 1;

// ============================================================================
// Client Messages (sent TO the backend)
// ============================================================================

/// Control frames sent from client to backend
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Session handshake; must be the first frame after the socket opens.
    /// This is what makes the backend allocate its STT/LLM pipeline.
    #[serde(rename = "start")]
    Start {
        sample_rate: u32,
        channels: u16,
        deepgram_language: String,
        deepgram_model: String,
        openai_model: String,
        system_prompt: String,
    },

    /// Inject a typed turn into the LLM, no audio involved.
    #[serde(rename = "text")]
    Text { text: String },

    /// Base64-encoded PCM16LE audio, for transports that mangle binary frames.
    #[serde(rename = "audio")]
    Audio { data: String },

    /// End of stream; the backend finishes and releases its pipeline.
    #[serde(rename = "end")]
    End,
}

impl ClientMessage {
    /// Build the handshake frame from an immutable session configuration.
    pub fn start(config: &SessionConfig) -> Self {
        Self::Start {
            sample_rate: TARGET_SAMPLE_RATE,
            channels: TARGET_CHANNELS,
            deepgram_language: config.deepgram_language.clone(),
            deepgram_model: config.deepgram_model.clone(),
            openai_model: config.openai_model.clone(),
            system_prompt: config.system_prompt.clone(),
        }
    }

    /// Build a typed-turn frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Wrap a raw PCM16LE frame as a base64 JSON frame.
    pub fn audio_b64(pcm: &[u8]) -> Self {
        Self::Audio {
            data: STANDARD.encode(pcm),
        }
    }
}

// ============================================================================
// Server Events (received FROM the backend)
// ============================================================================

/// Events received from the backend
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Connection accepted, backend is listening for the handshake
    #[serde(rename = "ready")]
    Ready,

    /// Handshake accepted, pipeline is running
    #[serde(rename = "started")]
    Started,

    /// Partial transcript; superseded by the next interim or final
    #[serde(rename = "stt_interim")]
    SttInterim {
        text: String,
        #[serde(default)]
        timestamp: Option<String>,
        #[serde(default)]
        language: Option<String>,
    },

    /// Committed transcript segment
    #[serde(rename = "stt_final")]
    SttFinal {
        text: String,
        #[serde(default)]
        timestamp: Option<String>,
        #[serde(default)]
        language: Option<String>,
    },

    /// A generated response is starting; clears any previous one
    #[serde(rename = "llm_start")]
    LlmStart,

    /// Append-only fragment of the generated response
    #[serde(rename = "llm_delta")]
    LlmDelta {
        #[serde(default)]
        text: String,
    },

    /// Generated response complete
    #[serde(rename = "llm_end")]
    LlmEnd,

    /// Backend-side failure; `fatal` distinguishes pipeline-ending errors
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: String,
        #[serde(default)]
        fatal: Option<bool>,
    },

    /// Catch-all for event types we don't handle, so deserialization
    /// never fails on protocol additions
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        matches!(self, ServerEvent::Error { .. })
    }

    /// Extract transcript text, if this event carries any
    pub fn text(&self) -> Option<&str> {
        match self {
            ServerEvent::SttInterim { text, .. }
            | ServerEvent::SttFinal { text, .. }
            | ServerEvent::LlmDelta { text } => Some(text),
            _ => None,
        }
    }
}
