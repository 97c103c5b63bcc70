//! Configuration reading and data directory paths.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dialogue::{Credentials, StreamLength};
use crate::persona::{normalize_selection, PersonaId};

use paths::get_data_dir;

const DEFAULT_API_URL: &str = "http://localhost:8000/api";
const DEFAULT_SILENCE_MS: u64 = 1200;
const DEFAULT_RESTART_DELAY_MS: u64 = 100;
const DEFAULT_BATCH_GAP_MS: u64 = 200;
const DEFAULT_STREAM_GAP_MS: u64 = 300;
const DEFAULT_PLAYBACK_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_INFLIGHT_FETCHES: usize = 4;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// console_config.json shape. Every field is optional on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Base URL of the dialogue / synthesis backend, e.g. `http://localhost:8000/api`.
    pub api_url: String,
    pub gemini_key: Option<String>,
    pub eleven_key: Option<String>,
    pub selected_personas: Vec<PersonaId>,
    pub stream_length: StreamLength,
    /// Silence window that closes a spoken turn.
    pub silence_ms: u64,
    /// Delay before the recognizer is restarted after it ends.
    pub restart_delay_ms: u64,
    pub batch_gap_ms: u64,
    pub stream_gap_ms: u64,
    /// Fallback cap per item; if the sink never reports end or error the
    /// item is treated as finished.
    pub playback_timeout_ms: u64,
    pub max_inflight_fetches: usize,
    pub request_timeout_secs: u64,
    pub volume: f32,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            gemini_key: None,
            eleven_key: None,
            selected_personas: PersonaId::SPEAKERS.to_vec(),
            stream_length: StreamLength::default(),
            silence_ms: DEFAULT_SILENCE_MS,
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
            batch_gap_ms: DEFAULT_BATCH_GAP_MS,
            stream_gap_ms: DEFAULT_STREAM_GAP_MS,
            playback_timeout_ms: DEFAULT_PLAYBACK_TIMEOUT_MS,
            max_inflight_fetches: DEFAULT_MAX_INFLIGHT_FETCHES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            volume: 1.0,
        }
    }
}

impl ConsoleConfig {
    pub fn silence_window(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn batch_gap(&self) -> Duration {
        Duration::from_millis(self.batch_gap_ms)
    }

    pub fn stream_gap(&self) -> Duration {
        Duration::from_millis(self.stream_gap_ms)
    }

    pub fn playback_timeout(&self) -> Duration {
        Duration::from_millis(self.playback_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Keys to push to the configuration endpoint, if any are set.
    pub fn credentials(&self) -> Option<Credentials> {
        let creds = Credentials {
            gemini_key: self.gemini_key.clone(),
            eleven_key: self.eleven_key.clone(),
        };
        (!creds.is_empty()).then_some(creds)
    }

    /// Replace out-of-range values with usable ones.
    pub fn sanitize(mut self) -> Self {
        let defaults = Self::default();
        if self.api_url.trim().is_empty() {
            self.api_url = defaults.api_url;
        }
        self.api_url = self.api_url.trim_end_matches('/').to_string();
        if self.silence_ms == 0 {
            self.silence_ms = DEFAULT_SILENCE_MS;
        }
        if self.playback_timeout_ms == 0 {
            self.playback_timeout_ms = DEFAULT_PLAYBACK_TIMEOUT_MS;
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT_SECS;
        }
        self.max_inflight_fetches = self.max_inflight_fetches.max(1);
        self.volume = if self.volume.is_finite() {
            self.volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.selected_personas = normalize_selection(&self.selected_personas);
        self.gemini_key = self.gemini_key.filter(|k| !k.trim().is_empty());
        self.eleven_key = self.eleven_key.filter(|k| !k.trim().is_empty());
        self
    }

    /// Apply `HQ_CONSOLE_API_URL`, `GEMINI_API_KEY` and `ELEVENLABS_API_KEY`.
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("HQ_CONSOLE_API_URL") {
            self.api_url = url;
        }
        if let Some(key) = lookup("GEMINI_API_KEY") {
            self.gemini_key = Some(key);
        }
        if let Some(key) = lookup("ELEVENLABS_API_KEY") {
            self.eleven_key = Some(key);
        }
        self
    }
}

/// Read console_config.json from the data directory, apply environment
/// overrides, and sanitize.
pub fn read_console_config() -> ConsoleConfig {
    let path = get_config_path();
    read_json_file::<ConsoleConfig>(&path)
        .unwrap_or_default()
        .apply_env_overrides()
        .sanitize()
}

/// Path to console_config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("console_config.json")
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}
