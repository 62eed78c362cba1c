//! Default configuration constants for livetrans.
//!
//! Shared by the configuration types and the engine so both agree on the
//! reference behavior.

/// Default capture sample rate in Hz.
///
/// 16kHz mono PCM16 is what the translation service's speech recognizer expects.
pub const SAMPLE_RATE: u32 = 16000;

/// Interval between outbound audio chunks in milliseconds.
pub const CHUNK_INTERVAL_MS: u64 = 250;

/// Default host the session endpoints are resolved against.
pub const SERVER_HOST: &str = "localhost:8000";

/// Default connection-establishment timeout in milliseconds.
///
/// 0 disables the timeout.
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default spoken language of the local speaker.
pub const INPUT_LANGUAGE: &str = "en";

/// Default language the service translates into (`lang` of `start_translation`).
pub const TARGET_LANGUAGE: &str = "es";

/// Maximum number of translated clips waiting for playback.
pub const PLAYBACK_CAPACITY: usize = 32;

/// MIME type of every translated clip.
pub const AUDIO_MIME: &str = "audio/wav";

/// Upper bound of a status `level`.
pub const LEVEL_MAX: f64 = 100.0;

/// Status labels rendered as "live" (green) by the console renderer.
pub const LIVE_STATUS_LABELS: &[&str] = &["Activo", "Traduciendo", "Enviando", "active"];

/// How long closing a connection may wait for its pump tasks to finish.
pub const CLOSE_GRACE_MS: u64 = 500;

/// Capacity of the channel between the capture task and the engine.
pub const CAPTURE_CHANNEL_CAPACITY: usize = 16;

/// Capacity of the outbound/inbound frame channels of a connection.
pub const FRAME_CHANNEL_CAPACITY: usize = 64;
