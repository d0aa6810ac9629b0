//! Contact directory: who the caller can message.

use recipechat_proto::user::{Contact, UserId};

use crate::api::ChatApi;
use crate::error::ChatError;

/// Lists the contacts `caller` may message.
///
/// The backend roster may include the caller; that entry is removed. Order is
/// otherwise preserved.
///
/// # Errors
///
/// Returns [`ChatError::DirectoryUnavailable`] if the roster cannot be
/// fetched or parsed, or [`ChatError::CredentialInvalid`] /
/// [`ChatError::Timeout`] from the API layer.
pub async fn list_contacts<A: ChatApi>(api: &A, caller: &UserId) -> Result<Vec<Contact>, ChatError> {
    let roster = api.fetch_contacts().await.inspect_err(|e| {
        tracing::warn!(error = %e, "contact listing failed");
    })?;
    let total = roster.len();
    let contacts: Vec<Contact> = roster.into_iter().filter(|c| c.id != *caller).collect();
    tracing::debug!(total, listed = contacts.len(), "contacts fetched");
    Ok(contacts)
}
