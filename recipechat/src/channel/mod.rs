//! Realtime channel layer.
//!
//! A channel is a push connection scoped to one room. [`Connector::open`]
//! returns a [`ChannelHandle`] immediately in [`ChannelState::Connecting`];
//! the connector's driver moves it through the state machine via a
//! [`ChannelLink`]:
//!
//! ```text
//! Connecting ──► Open ──► Closed
//!     │            │
//!     └────────────┴────► Error
//! ```
//!
//! Concrete connectors:
//! - [`ws::WsConnector`]: WebSocket connection to the backend
//! - [`loopback::LoopbackConnector`]: in-process remote end for testing

pub mod loopback;
pub mod ws;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use recipechat_proto::credential::Credential;
use recipechat_proto::message::{FrameError, InboundFrame, Message, OutboundFrame};
use recipechat_proto::room::RoomId;
use tokio::sync::{mpsc, watch};

use crate::error::ChatError;

/// Lifecycle state of a realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Handshake in progress.
    Connecting,
    /// Frames flow both ways.
    Open,
    /// Closed locally or by the remote end.
    Closed,
    /// Handshake failed or the connection faulted.
    Error,
}

impl ChannelState {
    /// `Closed` and `Error` are final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Notification pushed to the registered callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The handshake completed.
    Opened,
    /// A well-formed message arrived.
    Message(Message),
    /// The remote end closed the connection.
    Closed,
    /// The connection failed; carries a description.
    Failed(String),
}

/// Receives channel events, one at a time and in arrival order.
pub type EventCallback = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Command from a [`ChannelHandle`] to its driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame to transmit.
    Frame(String),
    /// Close the connection.
    Close,
}

/// State shared between a handle and its link.
struct Shared {
    room: RoomId,
    state: watch::Sender<ChannelState>,
    callback: EventCallback,
    /// Held while a transition is applied and its event delivered, so events
    /// are serialized and none is delivered once `close` has returned.
    delivery: Mutex<()>,
    failure: Mutex<Option<ChatError>>,
}

impl Shared {
    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Moves to `next` if the current state satisfies `from`.
    fn transition(&self, from: impl Fn(ChannelState) -> bool, next: ChannelState) -> bool {
        self.state.send_if_modified(|s| {
            if from(*s) {
                *s = next;
                true
            } else {
                false
            }
        })
    }
}

/// Client-facing half of a channel.
///
/// Dropping the handle closes the channel.
pub struct ChannelHandle {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

/// Transport-facing half of a channel, consumed by a connector's driver.
pub struct ChannelDriver {
    /// Drives the state machine and delivers inbound frames.
    pub link: ChannelLink,
    /// Commands issued through the handle.
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl ChannelHandle {
    /// Creates a channel for `room` in [`ChannelState::Connecting`].
    ///
    /// Connectors keep the [`ChannelDriver`] and return the handle.
    pub fn new(room: RoomId, callback: EventCallback) -> (Self, ChannelDriver) {
        let (state, _) = watch::channel(ChannelState::Connecting);
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            room,
            state,
            callback,
            delivery: Mutex::new(()),
            failure: Mutex::new(None),
        });
        let handle = Self {
            shared: Arc::clone(&shared),
            outbound: tx,
        };
        let driver = ChannelDriver {
            link: ChannelLink { shared },
            outbound: rx,
        };
        (handle, driver)
    }

    /// The room this channel is scoped to.
    pub fn room(&self) -> &RoomId {
        &self.shared.room
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Watches state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Waits until the channel leaves `Connecting` and returns the new state.
    pub async fn wait_settled(&self) -> ChannelState {
        let mut rx = self.subscribe();
        match rx.wait_for(|s| *s != ChannelState::Connecting).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Takes the error that moved the channel to [`ChannelState::Error`].
    pub fn take_failure(&self) -> Option<ChatError> {
        self.shared.failure.lock().take()
    }

    /// Sends a message body as an outbound frame.
    ///
    /// # Errors
    ///
    /// - [`ChatError::ChannelNotOpen`] unless the channel is `Open`.
    /// - [`ChatError::EmptyMessage`] if `body` is blank.
    pub fn send(&self, body: &str) -> Result<(), ChatError> {
        if self.state() != ChannelState::Open {
            return Err(ChatError::ChannelNotOpen);
        }
        if body.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let json = OutboundFrame::new(body)
            .to_json()
            .map_err(|e| ChatError::ChannelFailed(e.to_string()))?;
        self.outbound
            .send(Outbound::Frame(json))
            .map_err(|_| ChatError::ChannelNotOpen)?;
        tracing::debug!(room = %self.shared.room, len = body.len(), "frame queued");
        Ok(())
    }

    /// Closes the channel. Idempotent; no callback fires after this returns.
    pub fn close(&self) {
        if self.state().is_terminal() {
            return;
        }
        let _delivery = self.shared.delivery.lock();
        if self.shared.transition(|s| !s.is_terminal(), ChannelState::Closed) {
            tracing::info!(room = %self.shared.room, "channel closed locally");
            let _ = self.outbound.send(Outbound::Close);
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("room", &self.shared.room)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Drives a channel from the transport side.
///
/// Every transition is applied only from a non-terminal state, so a link
/// outliving a local close is inert.
#[derive(Clone)]
pub struct ChannelLink {
    shared: Arc<Shared>,
}

impl ChannelLink {
    /// The room this channel is scoped to.
    pub fn room(&self) -> &RoomId {
        &self.shared.room
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Marks the handshake complete. Returns `false` if the channel was
    /// closed meanwhile, in which case the driver should hang up.
    pub fn mark_open(&self) -> bool {
        let _delivery = self.shared.delivery.lock();
        let opened = self
            .shared
            .transition(|s| s == ChannelState::Connecting, ChannelState::Open);
        if opened {
            tracing::info!(room = %self.shared.room, "channel open");
            (self.shared.callback)(ChannelEvent::Opened);
        }
        opened
    }

    /// Parses and delivers an inbound text frame.
    ///
    /// Malformed frames are logged and dropped; the channel stays open.
    pub fn deliver_text(&self, text: &str) {
        self.deliver(InboundFrame::parse(text));
    }

    /// Parses and delivers an inbound binary frame holding UTF-8 JSON.
    pub fn deliver_bytes(&self, bytes: &[u8]) {
        self.deliver(InboundFrame::parse_bytes(bytes));
    }

    fn deliver(&self, frame: Result<InboundFrame, FrameError>) {
        let message = match frame.and_then(|f| f.into_message(chrono::Utc::now())) {
            Ok(message) => message,
            Err(e) => {
                let err = ChatError::MalformedFrame(e.to_string());
                tracing::warn!(room = %self.shared.room, error = %err, "dropping inbound frame");
                return;
            }
        };
        let _delivery = self.shared.delivery.lock();
        if self.shared.state() != ChannelState::Open {
            tracing::debug!(room = %self.shared.room, "frame after close ignored");
            return;
        }
        tracing::debug!(room = %self.shared.room, sender = %message.sender, "frame received");
        (self.shared.callback)(ChannelEvent::Message(message));
    }

    /// The remote end closed the connection.
    pub fn remote_closed(&self) {
        let _delivery = self.shared.delivery.lock();
        if self
            .shared
            .transition(|s| !s.is_terminal(), ChannelState::Closed)
        {
            tracing::info!(room = %self.shared.room, "channel closed by remote");
            (self.shared.callback)(ChannelEvent::Closed);
        }
    }

    /// The handshake failed or the connection faulted.
    pub fn fail(&self, err: ChatError) {
        let _delivery = self.shared.delivery.lock();
        if !self
            .shared
            .transition(|s| !s.is_terminal(), ChannelState::Error)
        {
            return;
        }
        tracing::warn!(room = %self.shared.room, error = %err, "channel failed");
        let reason = err.to_string();
        *self.shared.failure.lock() = Some(err);
        (self.shared.callback)(ChannelEvent::Failed(reason));
    }
}

/// Opens realtime channels.
pub trait Connector: Send + Sync {
    /// Starts connecting to `room` as the holder of `credential`.
    ///
    /// Returns at once with a handle in [`ChannelState::Connecting`]; events
    /// are pushed to `callback`.
    fn open(&self, room: &RoomId, credential: &Credential, callback: EventCallback)
    -> ChannelHandle;
}

impl<T: Connector> Connector for Arc<T> {
    fn open(
        &self,
        room: &RoomId,
        credential: &Credential,
        callback: EventCallback,
    ) -> ChannelHandle {
        (**self).open(room, credential, callback)
    }
}
