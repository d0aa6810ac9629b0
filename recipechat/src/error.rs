//! Error taxonomy of the messaging core.
//!
//! Every component returns [`ChatError`]. The session maps errors to a
//! [`Failure`](crate::session::Failure) using [`ChatError::kind`] and
//! [`ChatError::is_retryable`] so a UI can tell "try again" apart from
//! "this will never work".

use std::fmt;
use std::time::Duration;

use recipechat_proto::credential::CredentialError;
use recipechat_proto::user::UserId;

/// Errors produced by the messaging core.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The session credential is absent, malformed, or was rejected.
    #[error("session credential is invalid: {0}")]
    CredentialInvalid(String),

    /// The contact roster could not be fetched or parsed.
    #[error("contact directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// The peer cannot be messaged (self, unknown, or empty id).
    #[error("invalid peer {peer}: {reason}")]
    InvalidPeer {
        /// The rejected peer.
        peer: UserId,
        /// Why it was rejected.
        reason: String,
    },

    /// Room negotiation failed for a transient reason.
    #[error("room negotiation failed: {0}")]
    RoomNegotiationFailed(String),

    /// Message history could not be fetched or parsed.
    #[error("message history unavailable: {0}")]
    HistoryUnavailable(String),

    /// A send was attempted while the channel is not open.
    #[error("channel is not open")]
    ChannelNotOpen,

    /// An inbound frame did not match the frame schema.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A network operation exceeded its time budget.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Which operation timed out.
        operation: &'static str,
        /// The budget that was exceeded.
        after: Duration,
    },

    /// The realtime handshake failed or the connection faulted.
    #[error("realtime channel failed: {0}")]
    ChannelFailed(String),

    /// The message body is empty after trimming.
    #[error("message body is empty")]
    EmptyMessage,
}

impl From<CredentialError> for ChatError {
    fn from(err: CredentialError) -> Self {
        Self::CredentialInvalid(err.to_string())
    }
}

/// Discriminant of [`ChatError`], cheap to copy into session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`ChatError::CredentialInvalid`].
    CredentialInvalid,
    /// See [`ChatError::DirectoryUnavailable`].
    DirectoryUnavailable,
    /// See [`ChatError::InvalidPeer`].
    InvalidPeer,
    /// See [`ChatError::RoomNegotiationFailed`].
    RoomNegotiationFailed,
    /// See [`ChatError::HistoryUnavailable`].
    HistoryUnavailable,
    /// See [`ChatError::ChannelNotOpen`].
    ChannelNotOpen,
    /// See [`ChatError::MalformedFrame`].
    MalformedFrame,
    /// See [`ChatError::Timeout`].
    Timeout,
    /// See [`ChatError::ChannelFailed`].
    ChannelFailed,
    /// See [`ChatError::EmptyMessage`].
    EmptyMessage,
    /// The open channel was closed by the remote end or faulted.
    ChannelLost,
}

impl ErrorKind {
    /// Whether re-selecting the contact may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(
            self,
            Self::CredentialInvalid | Self::InvalidPeer | Self::EmptyMessage
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CredentialInvalid => "CredentialInvalid",
            Self::DirectoryUnavailable => "DirectoryUnavailable",
            Self::InvalidPeer => "InvalidPeer",
            Self::RoomNegotiationFailed => "RoomNegotiationFailed",
            Self::HistoryUnavailable => "HistoryUnavailable",
            Self::ChannelNotOpen => "ChannelNotOpen",
            Self::MalformedFrame => "MalformedFrame",
            Self::Timeout => "Timeout",
            Self::ChannelFailed => "ChannelFailed",
            Self::EmptyMessage => "EmptyMessage",
            Self::ChannelLost => "ChannelLost",
        };
        f.write_str(name)
    }
}

impl ChatError {
    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CredentialInvalid(_) => ErrorKind::CredentialInvalid,
            Self::DirectoryUnavailable(_) => ErrorKind::DirectoryUnavailable,
            Self::InvalidPeer { .. } => ErrorKind::InvalidPeer,
            Self::RoomNegotiationFailed(_) => ErrorKind::RoomNegotiationFailed,
            Self::HistoryUnavailable(_) => ErrorKind::HistoryUnavailable,
            Self::ChannelNotOpen => ErrorKind::ChannelNotOpen,
            Self::MalformedFrame(_) => ErrorKind::MalformedFrame,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ChannelFailed(_) => ErrorKind::ChannelFailed,
            Self::EmptyMessage => ErrorKind::EmptyMessage,
        }
    }

    /// Whether retrying the failed operation may succeed.
    ///
    /// Network and timeout failures are retryable; an invalid peer or
    /// credential is not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
