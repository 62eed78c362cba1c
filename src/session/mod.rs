//! Session lifecycle: one capture-translate-playback conversation bound to a
//! single connection.

pub mod capture;
pub mod engine;
pub mod listener;
pub mod status;

use crate::error::LivetransError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

pub use engine::{EngineConfig, EngineHandle, SessionEngine};
pub use listener::{CollectorListener, ListenerEvent, SessionListener};
pub use status::{StatusOrigin, StatusUpdate};

/// Translation mode; each mode has its own service endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One utterance at a time.
    Speech,
    /// Continuous translation of a live stream.
    Live,
    /// Continuous translation of a speaker, with synthesized speech back.
    #[default]
    Speaker,
}

impl Mode {
    /// Endpoint path of the mode on the service.
    pub fn path(self) -> &'static str {
        match self {
            Mode::Speech => "/ws/speech",
            Mode::Live => "/ws/live",
            Mode::Speaker => "/ws/speaker",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Speech => "speech",
            Mode::Live => "live",
            Mode::Speaker => "speaker",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = LivetransError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "speech" => Ok(Mode::Speech),
            "live" => Ok(Mode::Live),
            "speaker" => Ok(Mode::Speaker),
            other => Err(LivetransError::ConfigInvalidValue {
                key: "session.mode".to_string(),
                message: format!("unknown mode '{}' (expected speech, live or speaker)", other),
            }),
        }
    }
}

/// When the microphone opens relative to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureTiming {
    /// Open the microphone once the connection is open.
    #[default]
    OnOpen,
    /// Open the microphone as soon as the session starts; chunks captured
    /// before the connection opens are not sent.
    OnStart,
}

/// Engine state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Stopping,
}

impl SessionState {
    /// Whether a session currently exists.
    pub fn is_busy(self) -> bool {
        !matches!(self, SessionState::Idle)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// The session currently owned by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub mode: Mode,
    pub input_language: Option<String>,
    pub url: Url,
}
