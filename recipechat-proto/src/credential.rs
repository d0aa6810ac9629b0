//! Session credential handling.
//!
//! The session credential is a signed JWT issued by the account service.
//! Clients never verify the signature; they only read the subject claim to
//! learn who they are. Rejection of a bad or expired token is the backend's
//! job and surfaces through the HTTP and realtime layers.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

use crate::user::UserId;

/// Reasons a credential cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// No token was supplied.
    #[error("credential is empty")]
    Empty,

    /// The token is not three dot-separated segments.
    #[error("credential has {0} segments, expected 3")]
    SegmentCount(usize),

    /// The payload segment is not base64url.
    #[error("credential payload is not base64url: {0}")]
    Encoding(String),

    /// The payload is not a JSON claims object.
    #[error("credential payload is not JSON: {0}")]
    Claims(String),

    /// Neither `user_id` nor `sub` is present.
    #[error("credential carries no subject claim")]
    NoSubject,
}

/// Claims read from the token payload.
#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    user_id: Option<UserId>,
    #[serde(default)]
    sub: Option<UserId>,
}

/// Opaque signed session token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token, for use in request headers and handshakes.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Extracts the caller's user id from the token payload.
    ///
    /// Reads `user_id`, falling back to the standard `sub` claim. Pure and
    /// synchronous; never touches the network.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the token is empty, malformed, or has
    /// no subject.
    pub fn subject(&self) -> Result<UserId, CredentialError> {
        let token = self.0.trim();
        if token.is_empty() {
            return Err(CredentialError::Empty);
        }

        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(CredentialError::SegmentCount(segments.len()));
        }

        let payload = URL_SAFE_NO_PAD
            .decode(segments[1].trim_end_matches('='))
            .map_err(|e| CredentialError::Encoding(e.to_string()))?;
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|e| CredentialError::Claims(e.to_string()))?;

        claims
            .user_id
            .or(claims.sub)
            .filter(|id| !id.is_empty())
            .ok_or(CredentialError::NoSubject)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Builds an unsigned token carrying the given claims payload.
///
/// Only useful against the development backend, which does not verify
/// signatures.
#[must_use]
pub fn unsigned_token(claims: &serde_json::Value) -> Credential {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    Credential(format!("{header}.{payload}.dev"))
}

/// Unsigned development token for `user_id`.
#[must_use]
pub fn dev_token(user_id: &str) -> Credential {
    unsigned_token(&serde_json::json!({ "user_id": user_id, "token_type": "access" }))
}
