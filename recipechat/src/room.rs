//! Room negotiation: the unique room shared by the caller and a peer.

use recipechat_proto::room::RoomId;
use recipechat_proto::user::UserId;

use crate::api::ChatApi;
use crate::error::ChatError;

/// Obtains the room for the pair `{caller, peer}`, creating it on the backend
/// if it does not exist yet.
///
/// The backend guarantees the same room for the same pair regardless of who
/// asks, so calling this repeatedly is safe.
///
/// # Errors
///
/// - [`ChatError::InvalidPeer`] if `peer` is empty, equals `caller`, or the
///   backend rejects it. No request is made for the local checks.
/// - [`ChatError::RoomNegotiationFailed`] on transport or server failure.
/// - [`ChatError::CredentialInvalid`] / [`ChatError::Timeout`] from the API.
pub async fn negotiate_room<A: ChatApi>(
    api: &A,
    caller: &UserId,
    peer: &UserId,
) -> Result<RoomId, ChatError> {
    if peer.is_empty() {
        return Err(ChatError::InvalidPeer {
            peer: peer.clone(),
            reason: "peer id is empty".to_string(),
        });
    }
    if peer == caller {
        return Err(ChatError::InvalidPeer {
            peer: peer.clone(),
            reason: "cannot open a conversation with yourself".to_string(),
        });
    }

    let room = api.create_room(peer).await.inspect_err(|e| {
        tracing::warn!(peer = %peer, error = %e, "room negotiation failed");
    })?;
    tracing::info!(peer = %peer, room = %room, "room negotiated");
    Ok(room)
}
