//! Configuration types for the storyva core.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the synthesis service API key.
pub const API_KEY_ENV: &str = "FISH_AUDIO_API_KEY";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryConfig {
    /// Streaming synthesis of the agent's own turns.
    pub synthesis: SynthesisConfig,
    /// One-shot line previews in a character voice.
    pub preview: PreviewConfig,
    /// Editor/agent synchronization channel settings.
    pub sync: SyncConfig,
    /// Diff proposal policy.
    pub diff: DiffConfig,
}

/// Streaming synthesis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// WebSocket endpoint of the live synthesis service.
    pub endpoint: String,
    /// Voice model (reference) id for the agent's voice.
    pub voice_id: String,
    /// Synthesis model name.
    pub model: String,
    /// Audio container/codec requested from the service.
    pub format: String,
    /// Latency mode: "normal" or "balanced".
    pub latency: String,
    /// Expected output sample rate in Hz.
    pub sample_rate: u32,
    /// Expected output channel count.
    pub channels: u16,
    /// Quiet period after the last event that ends the stream.
    ///
    /// The service does not reliably send a finish event. Tuned against one
    /// vendor; lower values risk truncating slow streams.
    pub idle_timeout_ms: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://api.fish.audio/v1/tts/live".to_owned(),
            voice_id: String::new(),
            model: "speech-1.6".to_owned(),
            format: "opus".to_owned(),
            latency: "normal".to_owned(),
            sample_rate: 24_000,
            channels: 1,
            idle_timeout_ms: 5_000,
        }
    }
}

impl SynthesisConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// API key from the environment. Never stored in the config file.
    #[must_use]
    pub fn api_key() -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// Line preview configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// HTTP endpoint for one-shot synthesis.
    pub endpoint: String,
    /// Voice used for male characters.
    pub male_voice_id: String,
    /// Voice used for female characters.
    pub female_voice_id: String,
    pub format: String,
    pub latency: String,
    pub timeout_secs: u64,
    /// Where preview files are written (system temp dir when unset).
    pub output_dir: Option<PathBuf>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.fish.audio/v1/tts".to_owned(),
            male_voice_id: String::new(),
            female_voice_id: String::new(),
            format: "mp3".to_owned(),
            latency: "balanced".to_owned(),
            timeout_secs: 30,
            output_dir: None,
        }
    }
}

/// Synchronization channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Capacity of each peer's command and transport queues.
    pub channel_capacity: usize,
    /// Capacity of the peer event broadcast channel.
    pub event_capacity: usize,
    /// Quiet period before a burst of local edits is sent as one update.
    ///
    /// Set to 0 to send every edit immediately.
    pub debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            event_capacity: 128,
            debounce_ms: 250,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// What happens to a proposal that fails grammar validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidDiffPolicy {
    /// Return the failure to the agent with reasons.
    #[default]
    Report,
    /// Drop silently (logged at debug level).
    Drop,
}

/// Diff proposal configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    pub invalid_policy: InvalidDiffPolicy,
}

impl StoryConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::StoryError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::StoryError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/storyva/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("storyva").join("config.toml")
        } else if let Some(config) = dirs::config_dir() {
            config.join("storyva").join("config.toml")
        } else {
            PathBuf::from("/tmp/storyva-config/config.toml")
        }
    }
}
