//! WebSocket channel to the voice-pipeline backend
//!
//! Owns one duplex connection. All outbound traffic (control frames and
//! audio frames) funnels through a single bounded queue drained by a writer
//! task, so frame order on the wire matches enqueue order. A reader task
//! decodes inbound JSON events and forwards them, tagged with the id of the
//! connection that produced them, so a replaced connection's events can be
//! recognized as stale.
//!
//! # Lifecycle
//!
//! 1. `connect()` - establish the socket, spawn reader/writer tasks
//! 2. `send_control()` / `AudioSender::send_frame()` - steady-state traffic
//! 3. `ChannelEvent::Closed`/`Errored` - delivered once when the socket dies
//!
//! There is no automatic reconnect; the session issues a fresh `connect()`
//! and the old `Channel` is dropped.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

use super::protocol::{ClientMessage, ServerEvent};
use super::TransportError;

/// Connection timeout for the initial WebSocket handshake
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound queue depth. Control frames are rare; the rest is audio at one
/// frame per capture callback, so this is several seconds of headroom.
const OUTBOUND_QUEUE_FRAMES: usize = 256;

/// Inbound channel lifecycle and event notifications
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A decoded backend event arrived
    Message { conn_id: Uuid, event: ServerEvent },
    /// The socket closed (close frame or EOF)
    Closed { conn_id: Uuid },
    /// The socket failed
    Errored { conn_id: Uuid, message: String },
}

#[derive(Debug)]
enum OutboundFrame {
    Control(ClientMessage),
    Audio(Vec<u8>),
    /// Flush a close frame and stop the writer
    Shutdown,
}

/// Cloneable handle the capture callback uses to push audio frames.
///
/// `send_frame` never blocks: a closed socket or a full queue drops that one
/// frame, and the next callback tries again. Lossiness is per-frame by
/// design.
#[derive(Clone)]
pub struct AudioSender {
    tx: mpsc::Sender<OutboundFrame>,
    open: Arc<AtomicBool>,
    json_audio: bool,
}

impl AudioSender {
    /// Push one encoded PCM frame. Returns whether the frame was accepted.
    pub fn send_frame(&self, pcm: Vec<u8>) -> bool {
        if !self.open.load(Ordering::SeqCst) {
            return false;
        }
        let frame = if self.json_audio {
            OutboundFrame::Control(ClientMessage::audio_b64(&pcm))
        } else {
            OutboundFrame::Audio(pcm)
        };
        self.tx.try_send(frame).is_ok()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// One live connection to the backend
pub struct Channel {
    conn_id: Uuid,
    open: Arc<AtomicBool>,
    out_tx: mpsc::Sender<OutboundFrame>,
    json_audio: bool,
    reader_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
}

impl Channel {
    /// Establish a connection and spawn its reader/writer tasks.
    ///
    /// Inbound notifications go to `events`, tagged with `conn_id`. The
    /// socket counts as open from the moment this returns `Ok`.
    pub async fn connect(
        url: &str,
        conn_id: Uuid,
        events: mpsc::Sender<ChannelEvent>,
        json_audio: bool,
    ) -> Result<Self, TransportError> {
        log::info!("Connecting to {}", url);

        let (ws_stream, _response) = timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| TransportError::ConnectFailed("connection timeout".to_string()))?
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        log::info!("WebSocket connected ({})", conn_id);

        let (mut write, mut read) = ws_stream.split();
        let open = Arc::new(AtomicBool::new(true));
        let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_QUEUE_FRAMES);

        let writer_open = open.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let message = match frame {
                    OutboundFrame::Control(msg) => match serde_json::to_string(&msg) {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            log::error!("Failed to serialize control frame: {}", e);
                            continue;
                        }
                    },
                    OutboundFrame::Audio(pcm) => Message::Binary(pcm),
                    OutboundFrame::Shutdown => break,
                };

                if let Err(e) = write.send(message).await {
                    log::warn!("WebSocket send failed: {}", e);
                    writer_open.store(false, Ordering::SeqCst);
                    return;
                }
            }

            // Queue closed or shutdown requested: try to close cleanly
            writer_open.store(false, Ordering::SeqCst);
            if let Err(e) = write.close().await {
                log::debug!("Error closing WebSocket: {}", e);
            }
            log::debug!("Writer task exiting");
        });

        let reader_open = open.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if events
                                .send(ChannelEvent::Message { conn_id, event })
                                .await
                                .is_err()
                            {
                                log::debug!("Event receiver dropped, reader exiting");
                                return;
                            }
                        }
                        Err(e) => {
                            // Malformed payloads are logged raw and ignored
                            let raw: String = text.chars().take(200).collect();
                            log::warn!("Unparseable frame from backend ({}): {}", e, raw);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        log::info!("WebSocket closed by backend ({})", conn_id);
                        reader_open.store(false, Ordering::SeqCst);
                        let _ = events.send(ChannelEvent::Closed { conn_id }).await;
                        return;
                    }
                    Ok(_) => {} // Ignore ping/pong/binary
                    Err(e) => {
                        log::warn!("WebSocket error ({}): {}", conn_id, e);
                        reader_open.store(false, Ordering::SeqCst);
                        let _ = events
                            .send(ChannelEvent::Errored {
                                conn_id,
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                }
            }

            // Stream ended without a close frame
            reader_open.store(false, Ordering::SeqCst);
            let _ = events.send(ChannelEvent::Closed { conn_id }).await;
            log::debug!("Reader task exiting");
        });

        Ok(Self {
            conn_id,
            open,
            out_tx,
            json_audio,
            reader_task,
            writer_task,
        })
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Enqueue a control frame. Non-blocking; fails if the connection is
    /// gone or the outbound queue is saturated.
    pub fn send_control(&self, msg: ClientMessage) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::SendFailed("channel is closed".to_string()));
        }
        self.out_tx
            .try_send(OutboundFrame::Control(msg))
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Handle for the capture callback to push audio frames through.
    pub fn audio_sender(&self) -> AudioSender {
        AudioSender {
            tx: self.out_tx.clone(),
            open: self.open.clone(),
            json_audio: self.json_audio,
        }
    }

    /// Close the connection. The writer flushes a close frame; pending
    /// queued frames ahead of the shutdown marker still go out first.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.out_tx.try_send(OutboundFrame::Shutdown);
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        // A replaced connection must not linger: mark closed and stop tasks.
        self.open.store(false, Ordering::SeqCst);
        let _ = self.out_tx.try_send(OutboundFrame::Shutdown);
        self.reader_task.abort();
        self.writer_task.abort();
    }
}
