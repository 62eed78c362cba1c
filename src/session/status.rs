//! Status projection: what the caller shows about session activity.

use crate::error::LivetransError;

/// Who produced a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOrigin {
    /// Sent by the translation service.
    Remote,
    /// Produced by the engine itself (lifecycle changes and failures).
    Engine,
}

/// One status change as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub label: String,
    /// Input level in 0..=100, when the service meters it.
    pub level: Option<u8>,
    pub origin: StatusOrigin,
}

pub const CONNECTING: &str = "connecting";
pub const CONNECTED: &str = "connected";
pub const STOPPED: &str = "stopped";
pub const CONNECTION_CLOSED: &str = "connection closed";
pub const NOT_CONNECTED: &str = "not connected";

impl StatusUpdate {
    pub fn remote(label: impl Into<String>, level: Option<u8>) -> Self {
        Self {
            label: label.into(),
            level,
            origin: StatusOrigin::Remote,
        }
    }

    pub fn engine(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            level: None,
            origin: StatusOrigin::Engine,
        }
    }

    /// Engine status for an error that reached the caller.
    pub fn error(error: &LivetransError) -> Self {
        Self::engine(format!("error: {}", error))
    }

    pub fn is_error(&self) -> bool {
        self.origin == StatusOrigin::Engine && self.label.starts_with("error: ")
    }

    /// Whether the label denotes active translation, compared case-insensitively.
    pub fn is_live<S: AsRef<str>>(&self, live_labels: &[S]) -> bool {
        live_labels
            .iter()
            .any(|live| live.as_ref().eq_ignore_ascii_case(&self.label))
    }
}
