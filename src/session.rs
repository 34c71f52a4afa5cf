//! Session state machine
//!
//! Single-writer pattern: all transitions go through `reduce()`, which
//! takes the current state and one event and returns the next state plus
//! the effects to execute. The reducer is pure; the effect runner does the
//! I/O and feeds completion events back in.
//!
//! Each connection cycle gets a fresh id. Channel and capture events carry
//! the id of the connection they belong to, and events from a replaced
//! connection are dropped as stale.

use uuid::Uuid;

use crate::transport::protocol::ServerEvent;

/// Authoritative session state. `Closed` is the post-connection terminal
/// state; it accepts the same events as `Idle`, so a new connect cycle can
/// begin at any time.
#[derive(Debug, Clone)]
pub enum State {
    Idle,
    Connecting {
        conn_id: Uuid,
        /// Streaming was requested before the channel opened; start as soon
        /// as it does.
        start_pending: bool,
    },
    Ready {
        conn_id: Uuid,
    },
    Streaming {
        conn_id: Uuid,
    },
    Stopping {
        conn_id: Uuid,
    },
    Closed,
}

impl Default for State {
    fn default() -> Self {
        State::Idle
    }
}

/// Events that can trigger state transitions.
#[derive(Debug, Clone)]
pub enum Event {
    // User intents
    ConnectRequested,
    StartRequested,
    StopRequested,
    /// Inject a typed turn (no audio)
    TextTurn {
        text: String,
    },
    /// Session loop shutdown; handled at the loop edge, never reduced
    Shutdown,

    // Channel lifecycle
    ChannelOpened {
        conn_id: Uuid,
    },
    ChannelConnectFailed {
        conn_id: Uuid,
        message: String,
    },
    ChannelClosed {
        conn_id: Uuid,
    },
    ChannelErrored {
        conn_id: Uuid,
        message: String,
    },

    // Capture lifecycle
    CaptureStarted {
        conn_id: Uuid,
        input_rate: u32,
    },
    CaptureFailed {
        conn_id: Uuid,
        message: String,
    },
    CaptureStopped {
        conn_id: Uuid,
    },

    // Decoded backend events
    Backend {
        conn_id: Uuid,
        event: ServerEvent,
    },
}

/// Effects to be executed after a state transition.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Open a fresh connection; replaces any previous one
    OpenChannel { conn_id: Uuid },
    /// Send the session-config handshake frame (exactly once per connection)
    SendConfig { conn_id: Uuid },
    /// Acquire the microphone and wire up the capture pipeline
    StartCapture { conn_id: Uuid },
    /// Tear down the capture pipeline (idempotent)
    StopCapture { conn_id: Uuid },
    /// Send the end-of-stream frame, if the channel is still open
    SendEnd { conn_id: Uuid },
    /// Send a typed turn
    SendText { conn_id: Uuid, text: String },
    /// Hand a backend event to the sink
    Publish { event: ServerEvent },
    /// Push the current status to the sink
    EmitStatus,
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore events tagged with a stale connection id
/// - Emit EmitStatus whenever the observable state changes
pub fn reduce(state: &State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    // Current connection id, if a connection cycle is underway
    let current: Option<Uuid> = match state {
        Idle | Closed => None,
        Connecting { conn_id, .. }
        | Ready { conn_id }
        | Streaming { conn_id }
        | Stopping { conn_id } => Some(*conn_id),
    };

    let is_stale = |id: Uuid| current != Some(id);

    match (state, event) {
        // -----------------
        // Connect
        // -----------------
        (Idle | Closed, ConnectRequested) => {
            let conn_id = Uuid::new_v4();
            (
                Connecting {
                    conn_id,
                    start_pending: false,
                },
                vec![OpenChannel { conn_id }, EmitStatus],
            )
        }
        // Duplicate connect while a connection exists: idempotent no-op
        (Connecting { .. } | Ready { .. } | Streaming { .. } | Stopping { .. }, ConnectRequested) => {
            (state.clone(), vec![])
        }

        // -----------------
        // Start streaming
        // -----------------
        // Start with no connection: connect first, stream once (and only if)
        // the channel opens.
        (Idle | Closed, StartRequested) => {
            let conn_id = Uuid::new_v4();
            (
                Connecting {
                    conn_id,
                    start_pending: true,
                },
                vec![OpenChannel { conn_id }, EmitStatus],
            )
        }
        (Connecting { conn_id, .. }, StartRequested) => (
            Connecting {
                conn_id: *conn_id,
                start_pending: true,
            },
            vec![],
        ),
        (Ready { conn_id }, StartRequested) => (
            Streaming { conn_id: *conn_id },
            vec![StartCapture { conn_id: *conn_id }, EmitStatus],
        ),
        // Already streaming: no-op. A second capture pipeline would
        // duplicate every captured block on the wire.
        (Streaming { .. }, StartRequested) => (state.clone(), vec![]),
        // Teardown in flight; the stop wins
        (Stopping { .. }, StartRequested) => (state.clone(), vec![]),

        // -----------------
        // Channel opened
        // -----------------
        // The handshake frame goes out first, strictly before any capture
        // effect, so the config always precedes audio on the wire.
        (
            Connecting {
                conn_id,
                start_pending,
            },
            ChannelOpened { conn_id: id },
        ) if *conn_id == id => {
            if *start_pending {
                (
                    Streaming { conn_id: *conn_id },
                    vec![
                        SendConfig { conn_id: *conn_id },
                        StartCapture { conn_id: *conn_id },
                        EmitStatus,
                    ],
                )
            } else {
                (
                    Ready { conn_id: *conn_id },
                    vec![SendConfig { conn_id: *conn_id }, EmitStatus],
                )
            }
        }
        (Connecting { conn_id, .. }, ChannelConnectFailed { conn_id: id, message })
            if *conn_id == id =>
        {
            log::warn!("Connect failed: {}", message);
            (Closed, vec![EmitStatus])
        }

        // -----------------
        // Stop streaming
        // -----------------
        (Streaming { conn_id }, StopRequested) => (
            Stopping { conn_id: *conn_id },
            vec![StopCapture { conn_id: *conn_id }, EmitStatus],
        ),
        // Stop when not streaming (never started, or already stopping):
        // completes without error, nothing to release.
        (Idle | Closed | Connecting { .. } | Ready { .. } | Stopping { .. }, StopRequested) => {
            (state.clone(), vec![])
        }

        // -----------------
        // Capture lifecycle
        // -----------------
        (Streaming { conn_id }, CaptureStarted { conn_id: id, input_rate })
            if *conn_id == id =>
        {
            log::info!("Capture running ({} Hz input)", input_rate);
            (state.clone(), vec![EmitStatus])
        }
        // Capture came up after a stop won the race: tear it straight back
        // down, nobody owns it anymore.
        (Ready { conn_id } | Stopping { conn_id }, CaptureStarted { conn_id: id, .. })
            if *conn_id == id =>
        {
            (state.clone(), vec![StopCapture { conn_id: *conn_id }])
        }
        // Microphone acquisition failed: the start is rejected, the session
        // stays usable on the open channel.
        (Streaming { conn_id }, CaptureFailed { conn_id: id, message }) if *conn_id == id => {
            log::warn!("Capture start failed: {}", message);
            (Ready { conn_id: *conn_id }, vec![EmitStatus])
        }
        // Teardown finished; signal end-of-stream (the runner skips the
        // frame if the channel is already gone).
        (Stopping { conn_id }, CaptureStopped { conn_id: id }) if *conn_id == id => (
            Ready { conn_id: *conn_id },
            vec![SendEnd { conn_id: *conn_id }, EmitStatus],
        ),

        // -----------------
        // Channel loss, from any state of the current connection
        // -----------------
        (_, ChannelClosed { conn_id: id }) if current == Some(id) => (
            Closed,
            vec![StopCapture { conn_id: id }, EmitStatus],
        ),
        (_, ChannelErrored { conn_id: id, message }) if current == Some(id) => {
            log::warn!("Channel error: {}", message);
            (Closed, vec![StopCapture { conn_id: id }, EmitStatus])
        }

        // -----------------
        // Typed turn: needs an open channel
        // -----------------
        (Ready { conn_id } | Streaming { conn_id }, TextTurn { text }) => (
            state.clone(),
            vec![SendText {
                conn_id: *conn_id,
                text,
            }],
        ),
        (_, TextTurn { .. }) => {
            log::warn!("Ignoring text turn: not connected");
            (state.clone(), vec![])
        }

        // -----------------
        // Backend events pass through to the sink
        // -----------------
        (_, Backend { conn_id: id, event }) if current == Some(id) => {
            (state.clone(), vec![Publish { event }])
        }

        // -----------------
        // Stale events (drop silently)
        // -----------------
        (_, ChannelOpened { conn_id: id }) if is_stale(id) => (state.clone(), vec![]),
        (_, ChannelConnectFailed { conn_id: id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, ChannelClosed { conn_id: id }) if is_stale(id) => (state.clone(), vec![]),
        (_, ChannelErrored { conn_id: id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, CaptureStarted { conn_id: id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, CaptureFailed { conn_id: id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, CaptureStopped { conn_id: id }) if is_stale(id) => (state.clone(), vec![]),
        (_, Backend { conn_id: id, .. }) if is_stale(id) => (state.clone(), vec![]),

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}
