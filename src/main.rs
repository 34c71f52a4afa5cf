use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use voicepipe::effects::{ClientEffectRunner, EffectRunner};
use voicepipe::session::Event;
use voicepipe::settings::load_settings;
use voicepipe::transport::protocol::ServerEvent;
use voicepipe::view::{EventSink, TranscriptView};
use voicepipe::{run_session_loop, SessionStatus};

/// Renders backend events and status changes to the terminal.
struct ConsoleSink {
    view: Mutex<TranscriptView>,
}

impl ConsoleSink {
    fn new() -> Self {
        Self {
            view: Mutex::new(TranscriptView::new()),
        }
    }

    /// Print the committed transcript and last generated answer.
    fn recap(&self) {
        let view = self.view.lock().unwrap();
        if view.finals().is_empty() && view.llm_text().is_empty() {
            return;
        }

        println!("--- session recap ---");
        for line in view.finals().iter().rev() {
            println!("you: {}", line);
        }
        if !view.llm_text().is_empty() {
            println!("assistant: {}", view.llm_text());
        }
    }
}

impl EventSink for ConsoleSink {
    fn publish(&self, event: &ServerEvent) {
        use std::io::Write;

        self.view.lock().unwrap().apply(event);

        match event {
            ServerEvent::Ready => log::info!("Backend ready"),
            ServerEvent::Started => log::info!("Backend pipeline started"),
            ServerEvent::SttInterim { text, .. } => {
                // Single rewritten line; superseded by the next interim
                print!("\r… {}\x1b[K", text);
                let _ = std::io::stdout().flush();
            }
            ServerEvent::SttFinal { text, .. } => {
                println!("\r\x1b[Kyou: {}", text);
            }
            ServerEvent::LlmStart => {
                print!("\r\x1b[Kassistant: ");
                let _ = std::io::stdout().flush();
            }
            ServerEvent::LlmDelta { text } => {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            ServerEvent::LlmEnd => println!(),
            ServerEvent::Error { message, fatal } => {
                log::error!(
                    "Backend error{}: {}",
                    if fatal.unwrap_or(false) { " (fatal)" } else { "" },
                    message
                );
            }
            ServerEvent::Unknown => log::debug!("Ignoring unknown backend event"),
        }
    }

    fn status(&self, status: &SessionStatus) {
        log::info!("Session status: {}", status.as_str());
    }
}

fn print_help() {
    println!("commands:");
    println!("  connect      open the backend connection");
    println!("  start        start streaming the microphone");
    println!("  stop         stop streaming");
    println!("  text <msg>   send a typed turn (no audio)");
    println!("  quit         exit");
}

/// Endpoint override from argv: `voicepipe [--url] <ws://...>`.
fn endpoint_from_args() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--url" {
            return args.next();
        }
        if arg.starts_with("ws://") || arg.starts_with("wss://") {
            return Some(arg);
        }
    }
    None
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Load .env if present (development convenience), then logging.
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Both ring and aws-lc are linked via the TLS stack; pick one explicitly
    // so rustls doesn't refuse to build a config at connect time.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        log::debug!("rustls crypto provider already installed");
    }

    let mut settings = load_settings();
    if let Some(url) = endpoint_from_args() {
        settings.ws_url = Some(url);
    }

    let endpoint = settings.endpoint_url();
    log::info!("Backend endpoint: {}", endpoint);

    let (tx, rx) = mpsc::channel::<Event>(32);
    let runner = ClientEffectRunner::new(endpoint, settings.session_config(), settings.json_audio);
    let sink = Arc::new(ConsoleSink::new());

    let loop_handle = tokio::spawn(run_session_loop(
        rx,
        tx.clone(),
        runner.clone() as Arc<dyn EffectRunner>,
        sink.clone() as Arc<dyn EventSink>,
    ));

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        let event = match line {
            "" => continue,
            "connect" => Event::ConnectRequested,
            "start" => Event::StartRequested,
            "stop" => Event::StopRequested,
            "quit" | "exit" => break,
            _ => {
                if let Some(text) = line.strip_prefix("text ") {
                    Event::TextTurn {
                        text: text.to_string(),
                    }
                } else {
                    print_help();
                    continue;
                }
            }
        };

        if tx.send(event).await.is_err() {
            break;
        }
    }

    let _ = tx.send(Event::Shutdown).await;
    let _ = loop_handle.await;
    runner.shutdown();
    sink.recap();

    let stats = runner.stats();
    log::info!(
        "Session over: {} audio frames, {:.1} KB sent",
        stats.frames_sent(),
        stats.bytes_sent() as f64 / 1024.0
    );
}
