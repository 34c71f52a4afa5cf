//! voicepipe: terminal client for a streaming voice-pipeline backend
//!
//! Captures the microphone, normalizes audio to 16kHz mono PCM16LE, streams
//! it over one WebSocket as binary frames, and renders the transcription and
//! generated-text events the backend pushes back. The core is a pure
//! reducer ([`session::reduce`]) driven by a single event loop; all I/O
//! lives behind the [`effects::EffectRunner`] trait.

pub mod audio;
pub mod effects;
pub mod session;
pub mod settings;
pub mod stats;
pub mod transport;
pub mod view;

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use effects::EffectRunner;
use session::{reduce, Effect, Event, State};
use view::EventSink;

/// Observable session status derived from the internal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Ready,
    Streaming,
    Stopping,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Ready => "ready",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Closed => "closed",
        }
    }
}

/// Map internal state to the status shown to the user.
pub fn status_of(state: &State) -> SessionStatus {
    match state {
        State::Idle => SessionStatus::Idle,
        State::Connecting { .. } => SessionStatus::Connecting,
        State::Ready { .. } => SessionStatus::Ready,
        State::Streaming { .. } => SessionStatus::Streaming,
        State::Stopping { .. } => SessionStatus::Stopping,
        State::Closed => SessionStatus::Closed,
    }
}

/// Run the session event loop until [`Event::Shutdown`] arrives or every
/// sender is dropped.
///
/// Effects execute in reducer order: `Publish`/`EmitStatus` go straight to
/// the sink, everything else is dispatched to the runner.
pub async fn run_session_loop(
    mut rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    runner: Arc<dyn EffectRunner>,
    sink: Arc<dyn EventSink>,
) {
    let mut state = State::default();
    sink.status(&status_of(&state));
    log::info!("Session loop started");

    while let Some(event) = rx.recv().await {
        if matches!(event, Event::Shutdown) {
            log::info!("Shutdown requested, ending session loop");
            break;
        }

        log::debug!("Event: {:?}", event);

        let old_discriminant = std::mem::discriminant(&state);
        let (next, effects) = reduce(&state, event);
        let new_discriminant = std::mem::discriminant(&next);

        if old_discriminant != new_discriminant {
            log::info!("State transition: {:?} -> {:?}", state, next);
        }

        state = next;

        for effect in effects {
            match effect {
                Effect::EmitStatus => sink.status(&status_of(&state)),
                Effect::Publish { event } => sink.publish(&event),
                other => runner.spawn(other, tx.clone()),
            }
        }
    }

    log::info!("Session loop ended");
}
