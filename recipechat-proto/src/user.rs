//! User identity and contact wire types.
//!
//! The upstream REST backend keys users by integer primary keys while the
//! realtime layer and tests use opaque strings, so [`UserId`] accepts both on
//! the way in and always serializes as a string.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Stable identifier of a user, owned by the external user directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty (never valid on the wire).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Accepted JSON encodings of a user identifier.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawUserId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawUserId::deserialize(deserializer)? {
            RawUserId::Text(s) => Self(s),
            RawUserId::Signed(n) => Self(n.to_string()),
            RawUserId::Unsigned(n) => Self(n.to_string()),
        })
    }
}

/// A user eligible to be messaged, as returned by the contact roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// The user's identifier.
    pub id: UserId,
    /// Handle shown in the roster.
    pub username: String,
    /// Contact e-mail; the roster may omit it.
    #[serde(default)]
    pub email: String,
}

impl Contact {
    /// Creates a contact with the given id and username and no e-mail.
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            username: username.into(),
            email: String::new(),
        }
    }
}
