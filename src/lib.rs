//! livetrans - realtime speech translation client
//!
//! Streams microphone audio to a translation service over a WebSocket and
//! plays the translated audio back, one clip at a time, in arrival order.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod codec;
pub mod config;
pub mod defaults;
pub mod error;
#[cfg(feature = "cli")]
pub mod output;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod transport;

// Composition root - needs everything
#[cfg(all(feature = "cpal-audio", feature = "cli"))]
pub mod app;

// Seams (audio in, audio out, connection)
pub use audio::player::AudioPlayer;
pub use audio::recorder::AudioSource;
pub use transport::{Connection, Connector, WebSocketConnector};

// Session
pub use session::{
    CaptureTiming, EngineConfig, EngineHandle, Mode, SessionEngine, SessionListener,
    SessionState, StatusUpdate,
};

// Payloads and playback
pub use codec::{AudioEncoding, PlayableAudio};
pub use playback::{OverflowPolicy, PlaybackConfig, PlaybackQueue};

// Error handling
pub use error::{LivetransError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
