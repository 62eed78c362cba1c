//! Decoding of translated audio payloads into playable clips.
//!
//! The service sends each translated clip as text inside a JSON message, either
//! as pairs of hex digits or as base64. Which one is in use depends on the
//! deployment, and a single message may also name its encoding explicitly.

use crate::defaults::AUDIO_MIME;
use crate::error::{LivetransError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Text encoding of an audio payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// Pairs of hex digits, one pair per byte.
    Hex,
    /// Standard base64 with padding.
    #[default]
    Base64,
    /// Hex when the payload looks like hex, base64 otherwise.
    Auto,
}

impl AudioEncoding {
    /// Resolve `Auto` against a concrete payload.
    ///
    /// A payload is treated as hex when it is non-empty, has even length and
    /// contains only hex digits. Base64 text made solely of hex digits is
    /// therefore read as hex; deployments that send such payloads must pin
    /// the encoding.
    pub fn resolve(self, payload: &str) -> AudioEncoding {
        match self {
            AudioEncoding::Auto if looks_like_hex(payload) => AudioEncoding::Hex,
            AudioEncoding::Auto => AudioEncoding::Base64,
            fixed => fixed,
        }
    }
}

impl fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioEncoding::Hex => "hex",
            AudioEncoding::Base64 => "base64",
            AudioEncoding::Auto => "auto",
        };
        f.write_str(name)
    }
}

impl FromStr for AudioEncoding {
    type Err = LivetransError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hex" => Ok(AudioEncoding::Hex),
            "base64" | "b64" => Ok(AudioEncoding::Base64),
            "auto" => Ok(AudioEncoding::Auto),
            other => Err(LivetransError::ConfigInvalidValue {
                key: "protocol.audio_encoding".to_string(),
                message: format!("unknown encoding '{}' (expected hex, base64 or auto)", other),
            }),
        }
    }
}

fn looks_like_hex(payload: &str) -> bool {
    !payload.is_empty()
        && payload.len() % 2 == 0
        && payload.bytes().all(|b| b.is_ascii_hexdigit())
}

/// A decoded translated clip, ready to hand to a player.
///
/// The bytes are shared, so cloning a clip (for the caller's `on_audio_ready`
/// subscription and for the playback queue) does not copy the audio.
#[derive(Clone, PartialEq, Eq)]
pub struct PlayableAudio {
    bytes: Arc<[u8]>,
    mime: &'static str,
}

impl PlayableAudio {
    /// Wrap already-decoded bytes as a WAV clip.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
            mime: AUDIO_MIME,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read the WAV header, if the clip carries one.
    pub fn wav_spec(&self) -> Option<hound::WavSpec> {
        hound::WavReader::new(Cursor::new(self.bytes()))
            .ok()
            .map(|reader| reader.spec())
    }

    /// Playback length computed from the WAV header.
    pub fn duration(&self) -> Option<Duration> {
        let reader = hound::WavReader::new(Cursor::new(self.bytes())).ok()?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            return None;
        }
        // hound's duration() counts frames (samples per channel)
        let frames = reader.duration() as u64;
        Some(Duration::from_micros(
            frames * 1_000_000 / spec.sample_rate as u64,
        ))
    }
}

impl fmt::Debug for PlayableAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayableAudio")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Decode a payload into a playable clip.
///
/// # Errors
/// Returns `LivetransError::Decode` for odd-length hex, non-hex characters,
/// or malformed base64 (bad alphabet or padding). Callers skip the clip and
/// carry on with the next one.
pub fn decode(payload: &str, encoding: AudioEncoding) -> Result<PlayableAudio> {
    let payload = payload.trim();
    let bytes = match encoding.resolve(payload) {
        AudioEncoding::Hex => hex::decode(payload).map_err(|e| LivetransError::Decode {
            message: format!("invalid hex payload: {}", e),
        })?,
        // resolve() never yields Auto
        AudioEncoding::Base64 | AudioEncoding::Auto => {
            BASE64
                .decode(payload)
                .map_err(|e| LivetransError::Decode {
                    message: format!("invalid base64 payload: {}", e),
                })?
        }
    };

    if bytes.is_empty() {
        return Err(LivetransError::Decode {
            message: "empty audio payload".to_string(),
        });
    }

    Ok(PlayableAudio::from_bytes(bytes))
}
