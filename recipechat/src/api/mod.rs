//! Backend API abstraction for the messaging core.
//!
//! Defines the [`ChatApi`] trait covering the three request/response calls the
//! core makes against the REST backend. Concrete implementations include:
//! - [`http::HttpChatApi`]: `reqwest` client for the real backend
//!
//! Tests substitute scripted implementations to control latency and failures.

pub mod http;

use std::future::Future;
use std::sync::Arc;

use recipechat_proto::message::Message;
use recipechat_proto::room::RoomId;
use recipechat_proto::user::{Contact, UserId};

use crate::error::ChatError;

/// Async request/response surface of the backend.
///
/// Implementations authenticate as the session's caller and map failures to
/// the operation's [`ChatError`] kind: [`ChatError::DirectoryUnavailable`],
/// [`ChatError::RoomNegotiationFailed`] / [`ChatError::InvalidPeer`], and
/// [`ChatError::HistoryUnavailable`], or [`ChatError::CredentialInvalid`] /
/// [`ChatError::Timeout`] for any of them.
pub trait ChatApi: Send + Sync {
    /// Fetch the messageable roster. May include the caller.
    fn fetch_contacts(&self) -> impl Future<Output = Result<Vec<Contact>, ChatError>> + Send;

    /// Obtain (creating if absent) the room shared with `peer`.
    ///
    /// Idempotent on the backend: the same pair always yields the same room.
    fn create_room(&self, peer: &UserId)
    -> impl Future<Output = Result<RoomId, ChatError>> + Send;

    /// Fetch the stored messages of `room`.
    fn fetch_messages(
        &self,
        room: &RoomId,
    ) -> impl Future<Output = Result<Vec<Message>, ChatError>> + Send;
}

impl<T: ChatApi> ChatApi for Arc<T> {
    fn fetch_contacts(&self) -> impl Future<Output = Result<Vec<Contact>, ChatError>> + Send {
        (**self).fetch_contacts()
    }

    fn create_room(
        &self,
        peer: &UserId,
    ) -> impl Future<Output = Result<RoomId, ChatError>> + Send {
        (**self).create_room(peer)
    }

    fn fetch_messages(
        &self,
        room: &RoomId,
    ) -> impl Future<Output = Result<Vec<Message>, ChatError>> + Send {
        (**self).fetch_messages(room)
    }
}
