//! Effect runner: executes the side effects produced by the session reducer
//!
//! Owns the two exclusive resources of a session: the single live channel
//! and the single live capture pipeline. Both live in `Option` slots and
//! are replaced, never shared; the reducer's re-entrancy rules guarantee
//! the runner is never asked to hold two of either.
//!
//! Quick, lock-only effects (control-frame sends, slot swaps) run
//! synchronously inside `spawn()` so their relative order matches the
//! reducer's effect order; anything that can block (connecting, device
//! acquisition, teardown) goes to a task.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::capture::{start_capture, CaptureHandle};
use crate::session::{Effect, Event};
use crate::settings::SessionConfig;
use crate::stats::StreamStats;
use crate::transport::channel::{Channel, ChannelEvent};
use crate::transport::protocol::ClientMessage;

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

/// Real effect runner: one WebSocket channel slot, one capture slot.
pub struct ClientEffectRunner {
    endpoint: String,
    config: SessionConfig,
    json_audio: bool,
    channel: Arc<Mutex<Option<Channel>>>,
    capture: Arc<Mutex<Option<CaptureHandle>>>,
    stats: Arc<StreamStats>,
}

impl ClientEffectRunner {
    pub fn new(endpoint: String, config: SessionConfig, json_audio: bool) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            config,
            json_audio,
            channel: Arc::new(Mutex::new(None)),
            capture: Arc::new(Mutex::new(None)),
            stats: Arc::new(StreamStats::new()),
        })
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    /// Release everything at process exit: stop capture, close the channel.
    pub fn shutdown(&self) {
        if let Some(mut handle) = self.capture.lock().unwrap().take() {
            handle.stop().log();
        }
        if let Some(channel) = self.channel.lock().unwrap().take() {
            channel.close();
        }
    }

    /// Send a control frame on the current connection, if it still is the
    /// connection the effect was issued for.
    fn send_on(&self, conn_id: Uuid, msg: ClientMessage, what: &str) {
        let guard = self.channel.lock().unwrap();
        match guard.as_ref() {
            Some(ch) if ch.conn_id() == conn_id => {
                if let Err(e) = ch.send_control(msg) {
                    log::warn!("Failed to send {}: {}", what, e);
                }
            }
            _ => log::debug!("Skipping {}: connection {} no longer current", what, conn_id),
        }
    }
}

impl EffectRunner for ClientEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::OpenChannel { conn_id } => {
                let endpoint = self.endpoint.clone();
                let channel_slot = self.channel.clone();
                let json_audio = self.json_audio;

                tokio::spawn(async move {
                    // Bridge transport notifications into session events.
                    let (ev_tx, mut ev_rx) = mpsc::channel::<ChannelEvent>(32);
                    let pump_tx = tx.clone();
                    tokio::spawn(async move {
                        while let Some(ev) = ev_rx.recv().await {
                            let mapped = match ev {
                                ChannelEvent::Message { conn_id, event } => {
                                    Event::Backend { conn_id, event }
                                }
                                ChannelEvent::Closed { conn_id } => {
                                    Event::ChannelClosed { conn_id }
                                }
                                ChannelEvent::Errored { conn_id, message } => {
                                    Event::ChannelErrored { conn_id, message }
                                }
                            };
                            if pump_tx.send(mapped).await.is_err() {
                                break;
                            }
                        }
                    });

                    match Channel::connect(&endpoint, conn_id, ev_tx, json_audio).await {
                        Ok(channel) => {
                            // Replace any previous connection; the old one
                            // shuts down on drop.
                            *channel_slot.lock().unwrap() = Some(channel);
                            let _ = tx.send(Event::ChannelOpened { conn_id }).await;
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Event::ChannelConnectFailed {
                                    conn_id,
                                    message: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            // Synchronous: the handshake frame must hit the outbound queue
            // before StartCapture can produce any audio frame.
            Effect::SendConfig { conn_id } => {
                self.send_on(conn_id, ClientMessage::start(&self.config), "session config");
            }

            Effect::StartCapture { conn_id } => {
                // Grab the audio sender now; if the connection is already
                // gone the start is rejected without touching the device.
                let sender = {
                    let guard = self.channel.lock().unwrap();
                    match guard.as_ref() {
                        Some(ch) if ch.conn_id() == conn_id && ch.is_open() => {
                            Some(ch.audio_sender())
                        }
                        _ => None,
                    }
                };
                let Some(sender) = sender else {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let _ = tx
                            .send(Event::CaptureFailed {
                                conn_id,
                                message: "channel is not open".to_string(),
                            })
                            .await;
                    });
                    return;
                };

                let capture_slot = self.capture.clone();
                let channel_slot = self.channel.clone();
                let stats = self.stats.clone();
                tokio::spawn(async move {
                    stats.reset();
                    let result =
                        tokio::task::spawn_blocking(move || start_capture(sender, stats)).await;

                    let event = match result {
                        Ok(Ok(mut handle)) => {
                            // The connection may have died while the device
                            // was being acquired; its teardown already ran
                            // against an empty slot, so this pipeline has no
                            // owner. Stop it instead of storing it.
                            let still_current = {
                                let guard = channel_slot.lock().unwrap();
                                matches!(guard.as_ref(),
                                    Some(ch) if ch.conn_id() == conn_id && ch.is_open())
                            };
                            if !still_current {
                                log::warn!("Connection gone during capture start, releasing");
                                let _ = tokio::task::spawn_blocking(move || handle.stop().log())
                                    .await;
                                return;
                            }

                            let input_rate = handle.input_rate();
                            *capture_slot.lock().unwrap() = Some(handle);
                            Event::CaptureStarted {
                                conn_id,
                                input_rate,
                            }
                        }
                        Ok(Err(e)) => Event::CaptureFailed {
                            conn_id,
                            message: e.to_string(),
                        },
                        Err(e) => Event::CaptureFailed {
                            conn_id,
                            message: format!("capture task failed: {}", e),
                        },
                    };
                    let _ = tx.send(event).await;
                });
            }

            Effect::StopCapture { conn_id } => {
                let capture_slot = self.capture.clone();
                tokio::spawn(async move {
                    let handle = capture_slot.lock().unwrap().take();
                    if let Some(mut handle) = handle {
                        let report = tokio::task::spawn_blocking(move || handle.stop())
                            .await
                            .unwrap_or_default();
                        report.log();
                    }
                    // Stop with nothing acquired is a successful no-op.
                    let _ = tx.send(Event::CaptureStopped { conn_id }).await;
                });
            }

            // Only if the channel survived the teardown; a dead channel
            // means the backend already knows the stream is over.
            Effect::SendEnd { conn_id } => {
                let send = {
                    let guard = self.channel.lock().unwrap();
                    matches!(guard.as_ref(), Some(ch) if ch.conn_id() == conn_id && ch.is_open())
                };
                if send {
                    self.send_on(conn_id, ClientMessage::End, "end-of-stream");
                } else {
                    log::debug!("Skipping end-of-stream: channel already closed");
                }
            }

            Effect::SendText { conn_id, text } => {
                self.send_on(conn_id, ClientMessage::text(text), "text turn");
            }

            // Handled by the session loop itself
            Effect::Publish { .. } | Effect::EmitStatus => {
                log::debug!("Effect {:?} reached the runner; session loop handles it", effect);
            }
        }
    }
}
