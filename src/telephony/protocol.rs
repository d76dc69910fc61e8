//! # Twilio Media Stream Protocol
//!
//! JSON text messages exchanged over `/outbound-media-stream`.
//!
//! ## Inbound Events:
//! - **start**: stream and call identifiers plus the `<Parameter>` values set
//!   in the TwiML (`lang`, `year`)
//! - **media**: base64 µ-law audio, 8 kHz mono
//! - **stop**: the call leg ended
//! - anything else (`connected`, `mark`, `dtmf`) is ignored
//!
//! ## Outbound Messages:
//! - `{"event":"media","streamSid":..,"media":{"payload":..}}`
//! - `{"event":"clear","streamSid":..}`
//!
//! ## Parse Policy:
//! Empty messages and messages without an `event` are ignored. Text that is
//! not JSON at all, or a `start`/`stop` with the wrong shape, is a protocol
//! error that ends the call. A badly shaped `media` event only loses that
//! frame.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Inbound protocol events.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    Start {
        start: StartMetadata,
    },
    Media {
        media: MediaPayload,
    },
    Stop,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    /// Stream handle; every outbound message must carry it
    pub stream_sid: String,
    #[serde(default)]
    pub call_sid: String,
    /// Values from `<Parameter name=.. value=..>` in the TwiML
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StartMetadata {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.custom_parameters.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaPayload {
    /// Base64 µ-law bytes
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Why an inbound message could not be used.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The connection is not speaking the protocol; the call ends.
    Malformed(String),
    /// One media frame is unusable; the stream continues.
    BadFrame(String),
}

impl ProtocolError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::Malformed(_))
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Malformed(msg) => write!(f, "malformed stream message: {}", msg),
            ProtocolError::BadFrame(msg) => write!(f, "unusable media frame: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Parse one inbound text message. `Ok(None)` means there is nothing to do.
pub fn parse_message(text: &str) -> Result<Option<StreamEvent>, ProtocolError> {
    if text.trim().is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let event_name = match value.get("event").and_then(|event| event.as_str()) {
        Some(name) => name.to_string(),
        None => return Ok(None),
    };

    match serde_json::from_value::<StreamEvent>(value) {
        Ok(StreamEvent::Other) => Ok(None),
        Ok(event) => Ok(Some(event)),
        Err(e) if event_name == "media" => Err(ProtocolError::BadFrame(e.to_string())),
        Err(e) => Err(ProtocolError::Malformed(format!("{} event: {}", event_name, e))),
    }
}

/// Messages sent back to Twilio.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundMessage {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundMessage {
    pub fn media(stream_sid: impl Into<String>, audio: &[u8]) -> Self {
        OutboundMessage::Media {
            stream_sid: stream_sid.into(),
            media: OutboundMedia {
                payload: B64.encode(audio),
            },
        }
    }

    pub fn clear(stream_sid: impl Into<String>) -> Self {
        OutboundMessage::Clear {
            stream_sid: stream_sid.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// What the connection owner is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Send a text frame.
    Text(String),
    /// Close the websocket, which ends the `<Connect><Stream>` and the call.
    Hangup,
}
