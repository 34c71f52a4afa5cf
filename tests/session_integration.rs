//! Integration tests for the session core
//!
//! Drives the reducer and the session loop against scripted collaborators:
//! a recording effect runner standing in for the real I/O, and a collecting
//! sink standing in for the terminal. No network or audio device required.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

use voicepipe::audio::{encode_pcm16le, resample};
use voicepipe::effects::EffectRunner;
use voicepipe::session::{reduce, Effect, Event, State};
use voicepipe::transport::protocol::ServerEvent;
use voicepipe::view::EventSink;
use voicepipe::{run_session_loop, status_of, SessionStatus};

// ============================================================================
// Scripted collaborators
// ============================================================================

/// Effect runner that records every dispatched effect and answers capture
/// effects with their success events, like a machine with a working mic.
struct RecordingRunner {
    effects: Mutex<Vec<Effect>>,
}

impl RecordingRunner {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            effects: Mutex::new(Vec::new()),
        })
    }

    fn effects(&self) -> Vec<Effect> {
        self.effects.lock().unwrap().clone()
    }
}

impl EffectRunner for RecordingRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        self.effects.lock().unwrap().push(effect.clone());

        let reply = match effect {
            Effect::OpenChannel { conn_id } => Some(Event::ChannelOpened { conn_id }),
            Effect::StartCapture { conn_id } => Some(Event::CaptureStarted {
                conn_id,
                input_rate: 48_000,
            }),
            Effect::StopCapture { conn_id } => Some(Event::CaptureStopped { conn_id }),
            _ => None,
        };

        if let Some(reply) = reply {
            tokio::spawn(async move {
                let _ = tx.send(reply).await;
            });
        }
    }
}

/// Sink that collects statuses and published events.
#[derive(Default)]
struct CollectingSink {
    statuses: Mutex<Vec<SessionStatus>>,
    events: Mutex<Vec<ServerEvent>>,
}

impl CollectingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn statuses(&self) -> Vec<SessionStatus> {
        self.statuses.lock().unwrap().clone()
    }

    fn events(&self) -> Vec<ServerEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for CollectingSink {
    fn publish(&self, event: &ServerEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn status(&self, status: &SessionStatus) {
        self.statuses.lock().unwrap().push(*status);
    }
}

/// Walk the reducer through connect -> open, returning the Ready state and
/// its connection id.
fn connected_session() -> (State, Uuid) {
    let (state, _) = reduce(&State::Idle, Event::ConnectRequested);
    let conn_id = match &state {
        State::Connecting { conn_id, .. } => *conn_id,
        other => panic!("expected Connecting, got {:?}", other),
    };
    let (state, _) = reduce(&state, Event::ChannelOpened { conn_id });
    assert!(matches!(state, State::Ready { .. }));
    (state, conn_id)
}

/// Replay a reducer walk's effects against a simulated ordered wire,
/// recording what the remote side would observe.
fn wire_frames(effects: &[Effect]) -> Vec<&'static str> {
    let mut frames = Vec::new();
    for effect in effects {
        match effect {
            Effect::SendConfig { .. } => frames.push("config"),
            // Capture wiring means audio frames start flowing from here on
            Effect::StartCapture { .. } => frames.push("audio"),
            Effect::SendEnd { .. } => frames.push("end"),
            _ => {}
        }
    }
    frames
}

// ============================================================================
// Reducer walks
// ============================================================================

mod ordering {
    use super::*;

    #[test]
    fn config_always_precedes_audio_on_immediate_start() {
        // Start requested before the channel even opens: the remote side
        // must still observe the config frame first.
        let (state, _) = reduce(&State::Idle, Event::StartRequested);
        let conn_id = match &state {
            State::Connecting { conn_id, .. } => *conn_id,
            other => panic!("expected Connecting, got {:?}", other),
        };

        let (state, effects) = reduce(&state, Event::ChannelOpened { conn_id });
        assert!(matches!(state, State::Streaming { .. }));

        let frames = wire_frames(&effects);
        assert_eq!(frames.first(), Some(&"config"));
        assert!(frames.contains(&"audio"));
    }

    #[test]
    fn config_sent_once_per_connection() {
        let (state, conn_id) = connected_session();

        // Start/stop cycles after the handshake never resend the config.
        let (state, effects) = reduce(&state, Event::StartRequested);
        assert!(!effects.iter().any(|e| matches!(e, Effect::SendConfig { .. })));

        let (state, effects) = reduce(&state, Event::StopRequested);
        assert!(!effects.iter().any(|e| matches!(e, Effect::SendConfig { .. })));

        let (_, effects) = reduce(&state, Event::CaptureStopped { conn_id });
        assert!(!effects.iter().any(|e| matches!(e, Effect::SendConfig { .. })));
    }

    #[test]
    fn end_frame_only_after_capture_teardown() {
        let (state, conn_id) = connected_session();
        let (state, _) = reduce(&state, Event::StartRequested);

        let mut all_effects = Vec::new();
        let (state, effects) = reduce(&state, Event::StopRequested);
        all_effects.extend(effects);
        let (_, effects) = reduce(&state, Event::CaptureStopped { conn_id });
        all_effects.extend(effects);

        let stop_pos = all_effects
            .iter()
            .position(|e| matches!(e, Effect::StopCapture { .. }))
            .expect("stop capture");
        let end_pos = all_effects
            .iter()
            .position(|e| matches!(e, Effect::SendEnd { .. }))
            .expect("send end");
        assert!(stop_pos < end_pos);
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn full_session_walk() {
        // Idle -> Connecting -> Ready -> Streaming -> Stopping -> Ready
        // -> Closed, with the expected effects at each step.
        let (state, conn_id) = connected_session();

        let (state, effects) = reduce(&state, Event::StartRequested);
        assert!(matches!(state, State::Streaming { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartCapture { .. })));

        let (state, _) = reduce(
            &state,
            Event::CaptureStarted {
                conn_id,
                input_rate: 44_100,
            },
        );
        assert!(matches!(state, State::Streaming { .. }));

        let (state, _) = reduce(&state, Event::StopRequested);
        assert!(matches!(state, State::Stopping { .. }));

        let (state, effects) = reduce(&state, Event::CaptureStopped { conn_id });
        assert!(matches!(state, State::Ready { .. }));
        assert!(effects.iter().any(|e| matches!(e, Effect::SendEnd { .. })));

        let (state, effects) = reduce(&state, Event::ChannelClosed { conn_id });
        assert!(matches!(state, State::Closed));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StopCapture { .. })));

        // Closed is Idle-equivalent: a new cycle can begin.
        let (state, _) = reduce(&state, Event::ConnectRequested);
        assert!(matches!(state, State::Connecting { .. }));
    }

    #[test]
    fn reentrancy_one_capture_pipeline() {
        let (state, _conn_id) = connected_session();
        let (state, first) = reduce(&state, Event::StartRequested);
        let (state, second) = reduce(&state, Event::StartRequested);
        let (_, third) = reduce(&state, Event::StartRequested);

        let captures = [first, second, third]
            .iter()
            .flatten()
            .filter(|e| matches!(e, Effect::StartCapture { .. }))
            .count();
        assert_eq!(captures, 1);
    }

    #[test]
    fn teardown_idempotent_without_start() {
        // Stop before anything was ever started: no effects, no error.
        let (next, effects) = reduce(&State::Idle, Event::StopRequested);
        assert!(matches!(next, State::Idle));
        assert!(effects.is_empty());

        let (state, _) = connected_session();
        let (next, effects) = reduce(&state, Event::StopRequested);
        assert!(matches!(next, State::Ready { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn stale_connection_events_do_not_disturb_new_cycle() {
        let (state, old_conn) = connected_session();
        let (state, _) = reduce(&state, Event::ChannelClosed { conn_id: old_conn });
        assert!(matches!(state, State::Closed));

        // New cycle under a fresh id; the old connection's death rattle
        // (a late Errored from its reader task) must be ignored.
        let (state, _) = reduce(&state, Event::ConnectRequested);
        let (next, effects) = reduce(
            &state,
            Event::ChannelErrored {
                conn_id: old_conn,
                message: "broken pipe".to_string(),
            },
        );
        assert!(matches!(next, State::Connecting { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn capture_failure_leaves_ready_nothing_acquired() {
        let (state, conn_id) = connected_session();
        let (state, _) = reduce(&state, Event::StartRequested);

        let (next, effects) = reduce(
            &state,
            Event::CaptureFailed {
                conn_id,
                message: "permission denied".to_string(),
            },
        );
        assert!(matches!(next, State::Ready { .. }));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::StopCapture { .. })));

        // A retry is possible immediately.
        let (next, effects) = reduce(&next, Event::StartRequested);
        assert!(matches!(next, State::Streaming { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartCapture { .. })));
    }
}

// ============================================================================
// Session loop with scripted collaborators
// ============================================================================

mod session_loop {
    use super::*;

    #[tokio::test]
    async fn loop_runs_connect_start_stop_cycle() {
        let runner = RecordingRunner::new();
        let sink = CollectingSink::new();
        let (tx, rx) = mpsc::channel::<Event>(32);

        let handle = tokio::spawn(run_session_loop(
            rx,
            tx.clone(),
            runner.clone() as Arc<dyn EffectRunner>,
            sink.clone() as Arc<dyn EventSink>,
        ));

        // The runner echoes completion events, so one user intent drives
        // the whole connect -> configure -> stream chain.
        tx.send(Event::StartRequested).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(Event::StopRequested).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(Event::Shutdown).await.unwrap();
        handle.await.unwrap();

        let frames = wire_frames(&runner.effects());
        assert_eq!(frames, vec!["config", "audio", "end"]);

        let statuses = sink.statuses();
        assert_eq!(statuses.first(), Some(&SessionStatus::Idle));
        assert!(statuses.contains(&SessionStatus::Connecting));
        assert!(statuses.contains(&SessionStatus::Streaming));
        assert!(statuses.contains(&SessionStatus::Ready));
    }

    #[tokio::test]
    async fn loop_publishes_backend_events_to_sink() {
        let runner = RecordingRunner::new();
        let sink = CollectingSink::new();
        let (tx, rx) = mpsc::channel::<Event>(32);

        let handle = tokio::spawn(run_session_loop(
            rx,
            tx.clone(),
            runner.clone() as Arc<dyn EffectRunner>,
            sink.clone() as Arc<dyn EventSink>,
        ));

        tx.send(Event::ConnectRequested).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // Find the live connection id from the recorded open effect.
        let conn_id = runner
            .effects()
            .iter()
            .find_map(|e| match e {
                Effect::OpenChannel { conn_id } => Some(*conn_id),
                _ => None,
            })
            .expect("open effect");

        tx.send(Event::Backend {
            conn_id,
            event: ServerEvent::SttFinal {
                text: "hola mundo".to_string(),
                timestamp: None,
                language: None,
            },
        })
        .await
        .unwrap();

        // Stale event from a connection that never existed: dropped.
        tx.send(Event::Backend {
            conn_id: Uuid::new_v4(),
            event: ServerEvent::Started,
        })
        .await
        .unwrap();

        tx.send(Event::Shutdown).await.unwrap();
        handle.await.unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ServerEvent::SttFinal { text, .. } if text == "hola mundo"));
    }

    #[tokio::test]
    async fn duplicate_start_requests_wire_one_pipeline() {
        let runner = RecordingRunner::new();
        let sink = CollectingSink::new();
        let (tx, rx) = mpsc::channel::<Event>(32);

        let handle = tokio::spawn(run_session_loop(
            rx,
            tx.clone(),
            runner.clone() as Arc<dyn EffectRunner>,
            sink.clone() as Arc<dyn EventSink>,
        ));

        tx.send(Event::StartRequested).await.unwrap();
        tx.send(Event::StartRequested).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(Event::StartRequested).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(Event::Shutdown).await.unwrap();
        handle.await.unwrap();

        let captures = runner
            .effects()
            .iter()
            .filter(|e| matches!(e, Effect::StartCapture { .. }))
            .count();
        assert_eq!(captures, 1);
    }
}

// ============================================================================
// End-to-end audio path
// ============================================================================

mod audio_path {
    use super::*;

    #[test]
    fn eight_samples_48k_to_16k_end_to_end() {
        // 8 samples at 48kHz -> 16kHz: floor(8/3) = 2 outputs, each the
        // mean of a 3-sample window; the last 2 input samples fall outside
        // any full window and are dropped. Expected, not a bug.
        let input = vec![0.3f32, 0.3, 0.3, -0.6, -0.6, -0.6, 0.9, 0.9];
        let block = resample(&input, 48_000, 16_000);

        assert_eq!(block.len(), 2);
        assert!((block[0] - 0.3).abs() < 1e-6);
        assert!((block[1] + 0.6).abs() < 1e-6);

        let pcm = encode_pcm16le(&block);
        assert_eq!(pcm.len(), 4);

        let first = i16::from_le_bytes([pcm[0], pcm[1]]);
        let second = i16::from_le_bytes([pcm[2], pcm[3]]);
        assert_eq!(first, (0.3f32 * 32767.0) as i16);
        assert_eq!(second, (-0.6f32 * 32768.0) as i16);
    }

    #[test]
    fn identity_rate_passes_through_bit_identical() {
        let input: Vec<f32> = (0..4096).map(|v| ((v % 255) as f32 - 127.0) / 127.0).collect();
        let out = resample(&input, 16_000, 16_000);
        assert_eq!(out, input);
    }
}

// ============================================================================
// Status mapping
// ============================================================================

mod status {
    use super::*;

    #[test]
    fn streaming_walk_produces_expected_statuses() {
        let (state, conn_id) = connected_session();
        assert_eq!(status_of(&state), SessionStatus::Ready);

        let (state, _) = reduce(&state, Event::StartRequested);
        assert_eq!(status_of(&state), SessionStatus::Streaming);

        let (state, _) = reduce(&state, Event::StopRequested);
        assert_eq!(status_of(&state), SessionStatus::Stopping);

        let (state, _) = reduce(&state, Event::CaptureStopped { conn_id });
        assert_eq!(status_of(&state), SessionStatus::Ready);
    }
}
