//! Chat message and realtime frame types.
//!
//! History entries and realtime frames share one canonical JSON shape:
//! `{"sender": .., "message": .., "timestamp": .., "id": ..}`. Outbound
//! frames sent by a client carry exactly `{"message": ..}`; the backend stamps
//! sender, timestamp and id before broadcasting.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::user::UserId;

/// Durable identifier of a persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a new time-ordered identifier (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wraps an identifier assigned elsewhere.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One chat message in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author of the message.
    pub sender: UserId,
    /// Body text.
    pub message: String,
    /// Creation instant (UTC).
    pub timestamp: DateTime<Utc>,
    /// Present once the backend has persisted the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
}

impl Message {
    /// Creates an unpersisted message.
    pub fn new(sender: UserId, body: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender,
            message: body.into(),
            timestamp,
            id: None,
        }
    }
}

/// Errors produced while parsing a realtime frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame is not JSON or does not match the frame schema.
    #[error("frame does not match schema: {0}")]
    Schema(#[from] serde_json::Error),

    /// The frame carries no sender attribution.
    #[error("frame has no sender")]
    MissingSender,

    /// The frame is not valid UTF-8 text.
    #[error("frame is not UTF-8 text")]
    NotText,
}

/// Realtime frame as received from the backend.
///
/// `sender` is required: attribution is stamped by the backend and a frame
/// without it is rejected. A missing `timestamp` falls back to the receipt
/// instant passed to [`InboundFrame::into_message`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundFrame {
    /// Body text.
    pub message: String,
    /// Backend-stamped author.
    #[serde(default)]
    pub sender: Option<UserId>,
    /// Backend-stamped creation time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Durable id, if the backend persisted the message before broadcasting.
    #[serde(default)]
    pub id: Option<MessageId>,
}

impl InboundFrame {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Schema`] if the text is not a JSON object with a
    /// string `message` field.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parses a binary frame that should contain UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::NotText`] for invalid UTF-8, otherwise as
    /// [`InboundFrame::parse`].
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(bytes).map_err(|_| FrameError::NotText)?;
        Self::parse(text)
    }

    /// Converts the frame into a [`Message`].
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::MissingSender`] if the frame has no (or an empty)
    /// sender.
    pub fn into_message(self, received_at: DateTime<Utc>) -> Result<Message, FrameError> {
        let sender = self
            .sender
            .filter(|s| !s.is_empty())
            .ok_or(FrameError::MissingSender)?;
        Ok(Message {
            sender,
            message: self.message,
            timestamp: self.timestamp.unwrap_or(received_at),
            id: self.id,
        })
    }
}

/// Frame a client sends on the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Body text.
    pub message: String,
}

impl OutboundFrame {
    /// Creates an outbound frame for the given body.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            message: body.into(),
        }
    }

    /// Encodes the frame as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Schema`] if serialization fails.
    pub fn to_json(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }
}
