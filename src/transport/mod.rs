//! WebSocket transport for the voice-pipeline backend
//!
//! One duplex connection carries JSON control frames and binary audio
//! frames outbound, and JSON events inbound. Reconnection is never
//! automatic; after a close or error the session has to issue a new
//! connect explicitly.

pub mod channel;
pub mod protocol;

pub use channel::{AudioSender, Channel, ChannelEvent};
pub use protocol::{ClientMessage, ServerEvent, TARGET_CHANNELS, TARGET_SAMPLE_RATE};

/// Errors that can occur on the transport channel
#[derive(Debug, Clone)]
pub enum TransportError {
    /// Failed to establish the WebSocket connection
    ConnectFailed(String),
    /// Failed to hand a frame to the connection
    SendFailed(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::ConnectFailed(e) => {
                write!(f, "Failed to connect to backend: {}", e)
            }
            TransportError::SendFailed(e) => {
                write!(f, "Failed to send frame: {}", e)
            }
        }
    }
}

impl std::error::Error for TransportError {}
