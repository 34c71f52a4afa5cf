//! Microphone capture using CPAL
//!
//! The cpal stream lives on a dedicated audio thread (cpal streams must not
//! move between threads), controlled through a command channel. The capture
//! callback runs the whole outbound pipeline synchronously: active check,
//! downmix to mono, resample to the wire rate, PCM16LE encode, frame send.
//!
//! # Teardown
//!
//! `CaptureHandle::stop()` runs an ordered teardown (deactivate flag, pause
//! stream, release stream) where each step's failure is recorded but never
//! prevents the following steps. Stopping twice, or a handle dropped without
//! an explicit stop, is safe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};

use crate::audio::pcm::encode_pcm16le;
use crate::audio::resample::resample;
use crate::stats::StreamStats;
use crate::transport::channel::AudioSender;
use crate::transport::protocol::TARGET_SAMPLE_RATE;

/// How long to wait for the audio thread to report startup or teardown.
const THREAD_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur while acquiring the microphone.
#[derive(Debug, Clone)]
pub enum CaptureError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    ThreadFailed(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NoInputDevice => write!(f, "No audio input device found"),
            CaptureError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            CaptureError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            CaptureError::ThreadFailed(e) => write!(f, "Audio thread failed: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Outcome of one teardown step.
#[derive(Debug, Clone)]
pub struct TeardownStep {
    pub name: &'static str,
    pub error: Option<String>,
}

impl TeardownStep {
    fn ok(name: &'static str) -> Self {
        Self { name, error: None }
    }

    fn failed(name: &'static str, error: String) -> Self {
        Self {
            name,
            error: Some(error),
        }
    }
}

/// Per-step record of a capture teardown. A failed step never aborts the
/// remaining steps; callers inspect or log the report instead.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub steps: Vec<TeardownStep>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.error.is_none())
    }

    pub fn log(&self) {
        for step in &self.steps {
            match &step.error {
                None => log::debug!("Teardown step {}: ok", step.name),
                Some(e) => log::warn!("Teardown step {} failed: {}", step.name, e),
            }
        }
    }
}

enum Command {
    Stop { reply: mpsc::Sender<TeardownReport> },
}

/// Handle to an active capture pipeline. Exactly one may exist at a time;
/// it is owned by the effect runner and replaced, never shared.
pub struct CaptureHandle {
    cmd_tx: Option<mpsc::Sender<Command>>,
    active: Arc<AtomicBool>,
    input_rate: u32,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Native sample rate of the capture device.
    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Stop capturing and release the device. Idempotent: a second call
    /// returns an empty report.
    pub fn stop(&mut self) -> TeardownReport {
        // Cooperative cancel first: the callback checks this flag before
        // doing any work, so at most one in-flight frame follows.
        self.active.store(false, Ordering::SeqCst);

        let Some(cmd_tx) = self.cmd_tx.take() else {
            return TeardownReport::default();
        };

        let (reply_tx, reply_rx) = mpsc::channel();
        let mut report = if cmd_tx.send(Command::Stop { reply: reply_tx }).is_err() {
            // Audio thread already gone; the stream died with it.
            TeardownReport {
                steps: vec![TeardownStep::ok("deactivate")],
            }
        } else {
            match reply_rx.recv_timeout(THREAD_REPLY_TIMEOUT) {
                Ok(report) => report,
                Err(e) => TeardownReport {
                    steps: vec![TeardownStep::failed(
                        "await_audio_thread",
                        format!("no teardown report: {}", e),
                    )],
                },
            }
        };

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                report
                    .steps
                    .push(TeardownStep::failed("join_audio_thread", "panicked".to_string()));
            }
        }

        report
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if self.cmd_tx.is_some() {
            self.stop().log();
        }
    }
}

/// Acquire the microphone and start the capture pipeline.
///
/// Blocks until the audio thread reports the stream is playing (or failed);
/// call from a blocking-friendly context. On failure nothing stays
/// acquired: the audio thread exits before this returns an error.
pub fn start_capture(
    sender: AudioSender,
    stats: Arc<StreamStats>,
) -> Result<CaptureHandle, CaptureError> {
    let (startup_tx, startup_rx) = mpsc::channel::<Result<u32, CaptureError>>();
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
    let active = Arc::new(AtomicBool::new(true));

    let thread_active = active.clone();
    let thread = std::thread::Builder::new()
        .name("audio-capture".to_string())
        .spawn(move || run_capture_thread(sender, stats, thread_active, startup_tx, cmd_rx))
        .map_err(|e| CaptureError::ThreadFailed(e.to_string()))?;

    match startup_rx.recv_timeout(THREAD_REPLY_TIMEOUT) {
        Ok(Ok(input_rate)) => Ok(CaptureHandle {
            cmd_tx: Some(cmd_tx),
            active,
            input_rate,
            thread: Some(thread),
        }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(e) => {
            active.store(false, Ordering::SeqCst);
            Err(CaptureError::ThreadFailed(format!(
                "no startup report: {}",
                e
            )))
        }
    }
}

fn run_capture_thread(
    sender: AudioSender,
    stats: Arc<StreamStats>,
    active: Arc<AtomicBool>,
    startup_tx: mpsc::Sender<Result<u32, CaptureError>>,
    cmd_rx: mpsc::Receiver<Command>,
) {
    let (stream, input_rate) = match build_stream(sender, stats, active.clone()) {
        Ok(v) => v,
        Err(e) => {
            let _ = startup_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = startup_tx.send(Err(CaptureError::StreamCreationFailed(format!(
            "Failed to start stream: {}",
            e
        ))));
        return;
    }

    log::info!(
        "Capture started ({} Hz input -> {} Hz wire)",
        input_rate,
        TARGET_SAMPLE_RATE
    );
    let _ = startup_tx.send(Ok(input_rate));

    // Park here holding the stream until a stop arrives or the handle is
    // dropped (channel disconnect).
    match cmd_rx.recv() {
        Ok(Command::Stop { reply }) => {
            let report = teardown(stream, &active);
            let _ = reply.send(report);
        }
        Err(_) => {
            let report = teardown(stream, &active);
            report.log();
        }
    }
}

/// Ordered teardown. Every step runs regardless of earlier failures.
fn teardown(stream: Stream, active: &AtomicBool) -> TeardownReport {
    let mut steps = Vec::new();

    active.store(false, Ordering::SeqCst);
    steps.push(TeardownStep::ok("deactivate"));

    match stream.pause() {
        Ok(()) => steps.push(TeardownStep::ok("pause_stream")),
        Err(e) => steps.push(TeardownStep::failed("pause_stream", e.to_string())),
    }

    drop(stream);
    steps.push(TeardownStep::ok("release_stream"));

    log::info!("Capture stopped");
    TeardownReport { steps }
}

fn build_stream(
    sender: AudioSender,
    stats: Arc<StreamStats>,
    active: Arc<AtomicBool>,
) -> Result<(Stream, u32), CaptureError> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or(CaptureError::NoInputDevice)?;

    log::info!("Using audio input device: {:?}", device.name());

    let supported_config = device
        .default_input_config()
        .map_err(|_| CaptureError::NoSupportedConfig)?;

    log::info!(
        "Audio config: {} Hz, {} channels, {:?}",
        supported_config.sample_rate().0,
        supported_config.channels(),
        supported_config.sample_format()
    );

    let sample_format = supported_config.sample_format();
    let config: StreamConfig = supported_config.into();
    let input_rate = config.sample_rate.0;

    let stream = match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, sender, stats, active),
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, sender, stats, active),
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, sender, stats, active),
        _ => Err(CaptureError::NoSupportedConfig),
    }?;

    Ok((stream, input_rate))
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    sender: AudioSender,
    stats: Arc<StreamStats>,
    active: Arc<AtomicBool>,
) -> Result<Stream, CaptureError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let err_fn = |err| log::error!("Audio stream error: {}", err);
    let channels = config.channels;
    let input_rate = config.sample_rate.0;

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !active.load(Ordering::SeqCst) || !sender.is_open() {
                    return;
                }

                let samples: Vec<f32> = data.iter().map(|&s| f32::from_sample(s)).collect();
                let mono = downmix_mono(&samples, channels);
                let block = resample(&mono, input_rate, TARGET_SAMPLE_RATE);
                let pcm = encode_pcm16le(&block);

                let bytes = pcm.len();
                // A refused frame (socket gone, queue full) is dropped at
                // frame granularity; the next callback tries again.
                if sender.send_frame(pcm) {
                    stats.record_frame(bytes);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

/// Average interleaved frames down to one channel.
pub fn downmix_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let channels = channels as usize;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
