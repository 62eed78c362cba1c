use crate::codec::AudioEncoding;
use crate::defaults;
use crate::error::{LivetransError, Result};
use crate::playback::{OverflowPolicy, PlaybackConfig};
use crate::session::{CaptureTiming, Mode};
use crate::transport;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
#[cfg(feature = "cli")]
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub protocol: ProtocolConfig,
    pub audio: AudioConfig,
    pub playback: PlaybackSettings,
    pub status: StatusConfig,
}

/// Where the translation service lives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// host[:port]; a scheme written here is ignored
    pub host: String,
    /// wss:// instead of ws://
    pub secure: bool,
    /// 0 disables the timeout
    pub connect_timeout_ms: u64,
}

/// Session defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_language: Option<String>,
    pub target_language: String,
    pub capture: CaptureTiming,
    pub chunk_interval_ms: u64,
}

/// Differences between service deployments
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProtocolConfig {
    pub audio_encoding: AudioEncoding,
    /// Surface the `level` field of status messages
    pub level_metering: bool,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub sample_rate: u32,
}

/// Translated audio playback
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackSettings {
    pub enabled: bool,
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
}

/// Status rendering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatusConfig {
    /// Labels shown as "live"
    pub live_labels: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::SERVER_HOST.to_string(),
            secure: false,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            input_language: Some(defaults::INPUT_LANGUAGE.to_string()),
            target_language: defaults::TARGET_LANGUAGE.to_string(),
            capture: CaptureTiming::default(),
            chunk_interval_ms: defaults::CHUNK_INTERVAL_MS,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            audio_encoding: AudioEncoding::default(),
            level_metering: true,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: defaults::PLAYBACK_CAPACITY,
            overflow: OverflowPolicy::default(),
            output_device: None,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            live_labels: defaults::LIVE_STATUS_LABELS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ServerConfig {
    /// None when the timeout is disabled
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }
}

impl SessionConfig {
    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }
}

impl PlaybackSettings {
    pub fn queue_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            capacity: self.capacity,
            overflow: self.overflow,
        }
    }
}

fn invalid(key: &str, message: &str) -> LivetransError {
    LivetransError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    ///
    /// # Errors
    /// `ConfigFileNotFound` if the file does not exist, `Config` for invalid
    /// TOML, `Io` for other read failures.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LivetransError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                LivetransError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(LivetransError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - LIVETRANS_HOST → server.host
    /// - LIVETRANS_MODE → session.mode
    /// - LIVETRANS_INPUT_LANGUAGE → session.input_language
    /// - LIVETRANS_AUDIO_DEVICE → audio.device
    ///
    /// # Errors
    /// Returns `ConfigInvalidValue` if LIVETRANS_MODE names no mode.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(host) = std::env::var("LIVETRANS_HOST")
            && !host.is_empty()
        {
            self.server.host = host;
        }

        if let Ok(mode) = std::env::var("LIVETRANS_MODE")
            && !mode.is_empty()
        {
            self.session.mode = mode.parse()?;
        }

        if let Ok(language) = std::env::var("LIVETRANS_INPUT_LANGUAGE")
            && !language.is_empty()
        {
            self.session.input_language = Some(language);
        }

        if let Ok(device) = std::env::var("LIVETRANS_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        Ok(self)
    }

    /// Reject values no session can run with
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(invalid("server.host", "must not be empty"));
        }
        transport::resolve(&self.server.host, self.server.secure, self.session.mode)?;
        if self.session.chunk_interval_ms == 0 {
            return Err(invalid("session.chunk_interval_ms", "must be greater than 0"));
        }
        if self.session.target_language.trim().is_empty() {
            return Err(invalid("session.target_language", "must not be empty"));
        }
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be greater than 0"));
        }
        if self.playback.capacity == 0 {
            return Err(invalid("playback.capacity", "must be greater than 0"));
        }
        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LivetransError::ConfigParse {
            message: format!("Failed to render configuration: {}", e),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/livetrans/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("livetrans").join("config.toml"))
            .ok_or_else(|| LivetransError::Other("Could not determine config directory".to_string()))
    }
}
