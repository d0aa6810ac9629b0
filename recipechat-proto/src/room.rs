//! Room negotiation wire types.
//!
//! A room names the single conversation between an unordered pair of users.
//! The backend hands out one canonical name per pair; [`RoomId::for_pair`]
//! is the naming scheme the development backend uses.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::user::UserId;

/// Server-assigned canonical identifier of a two-party conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wraps a room name received from the backend.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Canonical room name for a pair of participants.
    ///
    /// Symmetric: `for_pair(a, b) == for_pair(b, a)`. Each id is escaped so
    /// that `_` only ever appears as the separator; distinct pairs never
    /// share a name.
    #[must_use]
    pub fn for_pair(a: &UserId, b: &UserId) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!(
            "room_{}_{}",
            escape_segment(lo.as_str()),
            escape_segment(hi.as_str())
        ))
    }

    /// Returns the room name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Percent-escapes `%` and `_` in a user id.
fn escape_segment(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for ch in id.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '_' => out.push_str("%5F"),
            other => out.push(other),
        }
    }
    out
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Body of `POST /chat/room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    /// The user the caller wants to talk to.
    pub peer_id: UserId,
}

/// Response of `POST /chat/room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    /// Canonical room for (caller, peer).
    pub room_name: RoomId,
}

/// Error body returned by the backend on rejected requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub error: String,
}
