//! Client settings persisted as JSON under the XDG config dir
//!
//! Missing or unreadable settings fall back to defaults; saves are atomic
//! (temp file then rename) so a crash mid-write can't corrupt the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SETTINGS_FILE_NAME: &str = "settings.json";
const APP_DIR_NAME: &str = "voicepipe";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Full WebSocket endpoint override. When set, `host`/`secure` are ignored.
    pub ws_url: Option<String>,

    /// Backend host:port used to derive the endpoint when `ws_url` is unset.
    pub host: String,

    /// Derive a wss:// endpoint instead of ws://.
    pub secure: bool,

    /// Language tag passed to the backend's Deepgram STT stage.
    pub deepgram_language: String,

    /// Deepgram model name.
    pub deepgram_model: String,

    /// OpenAI model name for the backend's LLM stage.
    pub openai_model: String,

    /// System prompt seeding the LLM context.
    pub system_prompt: String,

    /// Send audio as base64 JSON frames instead of binary frames.
    /// Only needed behind proxies that mangle binary WebSocket payloads.
    pub json_audio: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ws_url: None,
            host: "127.0.0.1:8000".to_string(),
            secure: false,
            deepgram_language: "es".to_string(),
            deepgram_model: "nova-3-general".to_string(),
            openai_model: "gpt-4.1".to_string(),
            system_prompt: "Eres un asistente útil y conciso.".to_string(),
            json_audio: false,
        }
    }
}

impl Settings {
    /// The WebSocket endpoint to connect to: explicit override if present,
    /// otherwise derived from `host` and `secure` with the fixed `/ws` path.
    pub fn endpoint_url(&self) -> String {
        if let Some(url) = &self.ws_url {
            let url = url.trim();
            if !url.is_empty() {
                return url.to_string();
            }
        }
        let proto = if self.secure { "wss" } else { "ws" };
        format!("{}://{}/ws", proto, self.host)
    }

    /// Snapshot the handshake fields into an immutable session configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            deepgram_language: self.deepgram_language.clone(),
            deepgram_model: self.deepgram_model.clone(),
            openai_model: self.openai_model.clone(),
            system_prompt: self.system_prompt.clone(),
        }
    }
}

/// Immutable per-session configuration, created once at session start and
/// sent exactly once as the handshake control frame.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub deepgram_language: String,
    pub deepgram_model: String,
    pub openai_model: String,
    pub system_prompt: String,
}

fn settings_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;
    Ok(dir.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn load_settings() -> Settings {
    match settings_path() {
        Ok(path) => load_settings_from(&path),
        Err(e) => {
            log::warn!("Settings: {}", e);
            Settings::default()
        }
    }
}

fn load_settings_from(path: &Path) -> Settings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<Settings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                Settings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            Settings::default()
        }
    }
}

pub fn save_settings(settings: &Settings) -> Result<(), String> {
    save_settings_to(&settings_path()?, settings)
}

fn save_settings_to(path: &Path, settings: &Settings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write atomically: write to a temp file in the same directory, then rename.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // On Unix, rename will atomically replace the destination. On Windows, rename
    // fails if the destination exists, so we remove it first (ignoring NotFound).
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(format!("Remove existing settings file {:?}: {}", path, e));
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}
