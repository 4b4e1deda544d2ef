//! Frame envelope for the push channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Raw inbound frame as sent by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    /// Opaque channel name, e.g. `usage_datapoint`.
    pub channel: String,
    /// Channel-specific payload.
    pub data: serde_json::Value,
}

#[derive(Deserialize)]
struct RawFrame {
    channel: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl InboundFrame {
    /// Parse a frame from a JSON text message.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object, or if `channel` is
    /// missing/empty or `data` is missing.
    pub fn from_json(text: &str) -> Result<Self, ProtoError> {
        let raw: RawFrame =
            serde_json::from_str(text).map_err(|e| ProtoError::Decoding(e.to_string()))?;

        let channel = raw.channel.ok_or(ProtoError::MissingField("channel"))?;
        if channel.is_empty() {
            return Err(ProtoError::Validation("channel cannot be empty".to_string()));
        }
        let data = raw.data.ok_or(ProtoError::MissingField("data"))?;

        Ok(Self { channel, data })
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }
}

/// A frame stamped with its arrival time.
///
/// Only lives for the duration of one dispatch; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Channel the event was published on.
    pub channel: String,
    /// Untyped payload.
    pub data: serde_json::Value,
    /// When the frame was received by this client.
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Create an event received now.
    #[must_use]
    pub fn new(channel: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            channel: channel.into(),
            data,
            received_at: Utc::now(),
        }
    }

    /// Stamp a parsed frame with its arrival time.
    #[must_use]
    pub fn from_frame(frame: InboundFrame, received_at: DateTime<Utc>) -> Self {
        Self {
            channel: frame.channel,
            data: frame.data,
            received_at,
        }
    }

    /// Parse a text frame received now.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn parse(text: &str) -> Result<Self, ProtoError> {
        InboundFrame::from_json(text).map(|frame| Self::from_frame(frame, Utc::now()))
    }
}

/// Messages a client may send on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Sent once after the transport opens.
    Hello {
        /// Client identifier, e.g. `ratelane-cli`.
        client: String,
        /// Client version.
        version: String,
    },
    /// Keepalive.
    Ping,
}

impl ClientMessage {
    /// Build a hello message for this client.
    #[must_use]
    pub fn hello(client: impl Into<String>, version: impl Into<String>) -> Self {
        Self::Hello {
            client: client.into(),
            version: version.into(),
        }
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }
}
