//! Identity resolution and the explicit session context.
//!
//! The caller's user id is read straight out of the session credential; no
//! network call is made. A token the backend later rejects surfaces as
//! [`ChatError::CredentialInvalid`] from the HTTP or realtime layers instead.

use recipechat_proto::credential::Credential;
use recipechat_proto::user::UserId;

use crate::config::SessionConfig;
use crate::error::ChatError;

/// Resolves the caller's identity from a raw token.
///
/// # Errors
///
/// Returns [`ChatError::CredentialInvalid`] if the token is absent,
/// malformed, or carries no subject claim.
pub fn resolve_identity(token: Option<&str>) -> Result<(Credential, UserId), ChatError> {
    let token = token.ok_or_else(|| ChatError::CredentialInvalid("no credential".to_string()))?;
    let credential = Credential::new(token);
    let caller = credential.subject()?;
    Ok((credential, caller))
}

/// Everything a conversation session needs to know about who is talking.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// The credential presented to the backend.
    pub credential: Credential,
    /// The caller's user id, decoded from the credential.
    pub caller: UserId,
    /// Session settings.
    pub config: SessionConfig,
}

impl SessionContext {
    /// Builds a context from a raw token.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::CredentialInvalid`] as [`resolve_identity`].
    pub fn from_token(token: Option<&str>, config: SessionConfig) -> Result<Self, ChatError> {
        let (credential, caller) = resolve_identity(token)?;
        tracing::info!(caller = %caller, "session identity resolved");
        Ok(Self {
            credential,
            caller,
            config,
        })
    }
}
