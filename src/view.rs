//! Transcript view state for rendering backend events
//!
//! Pure value implementing the display rules: committed transcript lines
//! accumulate newest-first, the latest interim occupies a single slot, and
//! generated text streams append-only until the turn completes.

use crate::transport::protocol::ServerEvent;
use crate::SessionStatus;

/// Keep this many committed transcript lines before dropping the oldest.
const MAX_FINAL_LINES: usize = 50;

/// Receiver for decoded backend events and session status changes.
///
/// The session core publishes through this trait and never renders; the
/// binary supplies a console implementation, tests supply collectors.
pub trait EventSink: Send + Sync + 'static {
    fn publish(&self, event: &ServerEvent);
    fn status(&self, status: &SessionStatus);
}

/// Aggregated transcript/generation state
#[derive(Debug, Clone, Default)]
pub struct TranscriptView {
    /// Committed transcript lines, newest first
    finals: Vec<String>,
    /// Latest partial transcript; replaced wholesale by the next interim
    interim: Option<String>,
    /// Generated text for the current turn
    llm_text: String,
    /// The current generated turn has seen `llm_end`
    llm_done: bool,
}

impl TranscriptView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one backend event into the view. Events that don't affect the
    /// transcript (ready/started/errors/unknown) are ignored here; callers
    /// log them.
    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::SttInterim { text, .. } => {
                self.interim = Some(text.clone());
            }
            ServerEvent::SttFinal { text, .. } => {
                self.interim = None;
                self.finals.insert(0, text.clone());
                self.finals.truncate(MAX_FINAL_LINES);
            }
            ServerEvent::LlmStart => {
                self.llm_text.clear();
                self.llm_done = false;
            }
            ServerEvent::LlmDelta { text } => {
                self.llm_text.push_str(text);
            }
            ServerEvent::LlmEnd => {
                self.llm_done = true;
            }
            _ => {}
        }
    }

    pub fn interim(&self) -> Option<&str> {
        self.interim.as_deref()
    }

    /// Committed lines, newest first
    pub fn finals(&self) -> &[String] {
        &self.finals
    }

    pub fn llm_text(&self) -> &str {
        &self.llm_text
    }

    pub fn llm_complete(&self) -> bool {
        self.llm_done
    }

    /// Reset for a fresh session
    pub fn reset(&mut self) {
        self.finals.clear();
        self.interim = None;
        self.llm_text.clear();
        self.llm_done = false;
    }
}
