//! JSON wire protocol spoken with the translation service.
//!
//! Outbound: binary frames carry raw audio chunks (one chunk per message, no
//! extra framing); text frames carry control commands. Inbound: text frames
//! carry a JSON object whose optional fields describe a status change, a
//! translation, or both.

use crate::codec::AudioEncoding;
use crate::defaults::LEVEL_MAX;
use crate::error::{LivetransError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

/// A single message on the duplex connection, independent of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
    /// Close handshake, with the peer's reason if it gave one.
    Close(Option<String>),
}

/// Control commands sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Begin translating the audio that follows.
    StartTranslation {
        /// Language to translate into.
        lang: String,
        /// Spoken language of the incoming audio, if known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_lang: Option<String>,
    },
    /// Stop translating; the connection closes right after.
    StopTranslation,
}

impl ControlCommand {
    /// Serialize command to JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize command from JSON string.
    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Anything the client sends. Not retained after it is handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Audio(Vec<u8>),
    Control(ControlCommand),
}

impl OutboundFrame {
    /// Encode the frame for the wire.
    pub fn into_wire(self) -> Result<WireMessage> {
        match self {
            OutboundFrame::Audio(bytes) => Ok(WireMessage::Binary(bytes)),
            OutboundFrame::Control(command) => {
                let json = command.to_json().map_err(|e| LivetransError::Protocol {
                    message: format!("Failed to serialize command: {}", e),
                })?;
                Ok(WireMessage::Text(json))
            }
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Audio(_) => "audio",
            OutboundFrame::Control(ControlCommand::StartTranslation { .. }) => "start_translation",
            OutboundFrame::Control(ControlCommand::StopTranslation) => "stop_translation",
        }
    }
}

/// Raw inbound message as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundMessage {
    pub status: Option<String>,
    /// Unreadable readings are treated as absent.
    #[serde(deserialize_with = "lenient_level")]
    pub level: Option<f64>,
    /// The earliest service revision named this field `translated_text`.
    #[serde(alias = "translated_text")]
    pub text: Option<String>,
    pub audio: Option<String>,
    /// Per-message override of the deployment's audio encoding. Unknown
    /// names fall back to the deployment's setting.
    #[serde(deserialize_with = "lenient_encoding")]
    pub encoding: Option<AudioEncoding>,
}

/// Accept a number or a numeric string; anything else reads as no level.
fn lenient_level<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let level = match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        other => {
            debug!(value = %other, "Ignoring unreadable level");
            None
        }
    };
    Ok(level)
}

fn lenient_encoding<'de, D>(deserializer: D) -> std::result::Result<Option<AudioEncoding>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoding = match Value::deserialize(deserializer)? {
        Value::String(name) => match name.parse::<AudioEncoding>() {
            Ok(encoding) => Some(encoding),
            Err(_) => {
                debug!(encoding = %name, "Ignoring unknown per-message encoding");
                None
            }
        },
        Value::Null => None,
        other => {
            debug!(value = %other, "Ignoring unreadable encoding");
            None
        }
    };
    Ok(encoding)
}

/// A parsed inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Status {
        label: String,
        /// Already clamped to 0..=100.
        level: Option<u8>,
    },
    Translation {
        text: Option<String>,
        audio: Option<String>,
        encoding: Option<AudioEncoding>,
    },
}

/// Clamp a meter reading to 0..=100 and round it to a whole percentage.
pub fn clamp_level(level: f64) -> u8 {
    if level.is_nan() {
        return 0;
    }
    level.clamp(0.0, LEVEL_MAX).round() as u8
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Parse one inbound text frame into zero or more events, in field order
/// status-then-translation.
///
/// Empty strings count as absent. A well-formed object without any known
/// field yields no events.
///
/// # Errors
/// Returns `LivetransError::Protocol` if the frame is not a JSON object of the
/// expected shape.
pub fn parse_inbound(text: &str) -> Result<Vec<InboundEvent>> {
    let message: InboundMessage =
        serde_json::from_str(text).map_err(|e| LivetransError::Protocol {
            message: format!("Malformed inbound message: {}", e),
        })?;

    let mut events = Vec::with_capacity(2);

    if let Some(label) = non_empty(message.status) {
        events.push(InboundEvent::Status {
            label,
            level: message.level.map(clamp_level),
        });
    }

    let text = non_empty(message.text);
    let audio = non_empty(message.audio);
    if text.is_some() || audio.is_some() {
        events.push(InboundEvent::Translation {
            text,
            audio,
            encoding: message.encoding,
        });
    }

    Ok(events)
}
