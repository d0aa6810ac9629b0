//! History loading for a room.

use recipechat_proto::message::Message;
use recipechat_proto::room::RoomId;

use crate::api::ChatApi;
use crate::error::ChatError;

/// Loads the stored messages of `room`, oldest first.
///
/// The sort is stable, so messages sharing a timestamp keep the order the
/// backend returned them in. An empty room yields an empty list.
///
/// # Errors
///
/// Returns [`ChatError::HistoryUnavailable`] on fetch or parse failure, or
/// [`ChatError::CredentialInvalid`] / [`ChatError::Timeout`] from the API.
pub async fn load_history<A: ChatApi>(api: &A, room: &RoomId) -> Result<Vec<Message>, ChatError> {
    let mut messages = api.fetch_messages(room).await.inspect_err(|e| {
        tracing::warn!(room = %room, error = %e, "history load failed");
    })?;
    messages.sort_by_key(|m| m.timestamp);
    tracing::debug!(room = %room, count = messages.len(), "history loaded");
    Ok(messages)
}
