use crate::audio::AudioFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default = "default_capture_interval_ms")]
    pub capture_interval_ms: u64,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    #[serde(default = "default_playback")]
    pub playback: bool,

    #[serde(default = "default_reset_on_record")]
    pub reset_on_record: bool,
}

fn default_server_url() -> String {
    "ws://localhost:8000/ws".to_string()
}

fn default_capture_interval_ms() -> u64 {
    250
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_channels() -> u16 {
    1
}

fn default_playback() -> bool {
    true
}

fn default_reset_on_record() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            capture_interval_ms: default_capture_interval_ms(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            playback: default_playback(),
            reset_on_record: default_reset_on_record(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.config/parley/config.json)
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, writing the defaults there if it is missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::info!(
                "Config file not found at {:?}, creating default config",
                config_path
            );
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        tracing::info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(dir)
        } else {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            PathBuf::from(home).join(".config")
        };

        Ok(config_dir.join("parley").join("config.json"))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // The websocket client is built without TLS support
        if self.server_url.starts_with("wss://") {
            return Err(anyhow::anyhow!(
                "server_url uses wss://, but only plain ws:// connections are supported"
            ));
        }

        if !self.server_url.starts_with("ws://") {
            return Err(anyhow::anyhow!("server_url must start with ws://"));
        }

        if self.capture_interval_ms == 0 {
            return Err(anyhow::anyhow!("capture_interval_ms must be positive"));
        }

        if self.sample_rate == 0 {
            return Err(anyhow::anyhow!("sample_rate must be positive"));
        }

        if self.channels == 0 {
            return Err(anyhow::anyhow!("channels must be positive"));
        }

        Ok(())
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }
}
