//! Loopback connector for testing.
//!
//! Every [`LoopbackConnector::open`] creates a channel whose remote end is an
//! in-process [`LoopbackRemote`] instead of a socket. Tests use the remote to
//! complete the handshake, push frames, close or fail the connection, and
//! inspect what the client sent.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use recipechat_proto::credential::Credential;
use recipechat_proto::message::{Message, MessageId, OutboundFrame};
use recipechat_proto::room::RoomId;
use recipechat_proto::user::UserId;
use tokio::sync::mpsc;

use super::{
    ChannelDriver, ChannelHandle, ChannelLink, ChannelState, Connector, EventCallback, Outbound,
};
use crate::error::ChatError;

/// What the client has pushed toward a remote end so far.
#[derive(Debug, Default)]
struct Received {
    frames: Vec<OutboundFrame>,
    /// Index into `frames` of the first frame not yet echoed.
    echoed: usize,
    close_requested: bool,
}

/// The far end of one loopback channel.
#[derive(Clone)]
pub struct LoopbackRemote {
    room: RoomId,
    credential: Credential,
    link: ChannelLink,
    outbound: Arc<Mutex<mpsc::UnboundedReceiver<Outbound>>>,
    received: Arc<Mutex<Received>>,
}

impl LoopbackRemote {
    fn new(room: RoomId, credential: Credential, driver: ChannelDriver) -> Self {
        Self {
            room,
            credential,
            link: driver.link,
            outbound: Arc::new(Mutex::new(driver.outbound)),
            received: Arc::new(Mutex::new(Received::default())),
        }
    }

    /// The room the client asked for.
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// The credential the client presented.
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Current state as seen by the client.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.link.state()
    }

    /// Completes the handshake. Returns `false` if the client already closed.
    pub fn accept(&self) -> bool {
        self.link.mark_open()
    }

    /// Pushes a raw text frame to the client.
    pub fn push_frame(&self, text: &str) {
        self.link.deliver_text(text);
    }

    /// Pushes a message, serialized the way the backend broadcasts it.
    pub fn push_message(&self, message: &Message) {
        match serde_json::to_string(message) {
            Ok(json) => self.link.deliver_text(&json),
            Err(e) => tracing::warn!(error = %e, "loopback could not encode message"),
        }
    }

    /// Closes the connection from the remote side.
    pub fn close(&self) {
        self.link.remote_closed();
    }

    /// Faults the connection with `reason`.
    pub fn fail(&self, reason: &str) {
        self.link.fail(ChatError::ChannelFailed(reason.to_string()));
    }

    /// Rejects the handshake as the backend does for a refused credential.
    pub fn reject_credential(&self) {
        self.link
            .fail(ChatError::CredentialInvalid("loopback rejected credential".into()));
    }

    /// Frames the client has sent so far, oldest first.
    #[must_use]
    pub fn sent_frames(&self) -> Vec<OutboundFrame> {
        self.drain();
        self.received.lock().frames.clone()
    }

    /// Whether the client has closed its end.
    #[must_use]
    pub fn client_closed(&self) -> bool {
        self.drain();
        self.received.lock().close_requested
    }

    /// Broadcasts every not-yet-echoed sent frame back to the client as a
    /// backend-stamped message from `sender`. Returns how many were echoed.
    pub fn echo_as(&self, sender: &UserId) -> usize {
        self.drain();
        let pending: Vec<OutboundFrame> = {
            let mut received = self.received.lock();
            let pending = received.frames[received.echoed..].to_vec();
            received.echoed = received.frames.len();
            pending
        };
        for frame in &pending {
            let message = Message {
                sender: sender.clone(),
                message: frame.message.clone(),
                timestamp: Utc::now(),
                id: Some(MessageId::generate()),
            };
            self.push_message(&message);
        }
        pending.len()
    }

    fn drain(&self) {
        let mut outbound = self.outbound.lock();
        let mut received = self.received.lock();
        loop {
            match outbound.try_recv() {
                Ok(Outbound::Frame(json)) => match serde_json::from_str(&json) {
                    Ok(frame) => received.frames.push(frame),
                    Err(e) => tracing::warn!(error = %e, "loopback got undecodable frame"),
                },
                Ok(Outbound::Close) | Err(mpsc::error::TryRecvError::Disconnected) => {
                    received.close_requested = true;
                    break;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
            }
        }
    }
}

/// Connector whose channels terminate in [`LoopbackRemote`]s.
pub struct LoopbackConnector {
    auto_accept: bool,
    remotes: Mutex<Vec<LoopbackRemote>>,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackConnector {
    /// Channels open as soon as the runtime gets to them.
    #[must_use]
    pub fn new() -> Self {
        Self {
            auto_accept: true,
            remotes: Mutex::new(Vec::new()),
        }
    }

    /// Channels stay `Connecting` until [`LoopbackRemote::accept`] is called.
    #[must_use]
    pub fn manual() -> Self {
        Self {
            auto_accept: false,
            remotes: Mutex::new(Vec::new()),
        }
    }

    /// All remote ends created so far, oldest first.
    #[must_use]
    pub fn remotes(&self) -> Vec<LoopbackRemote> {
        self.remotes.lock().clone()
    }

    /// The most recently created remote end.
    #[must_use]
    pub fn last_remote(&self) -> Option<LoopbackRemote> {
        self.remotes.lock().last().cloned()
    }

    /// Number of channels opened so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.remotes.lock().len()
    }

    /// Number of channels not yet closed or failed.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.remotes
            .lock()
            .iter()
            .filter(|r| !r.state().is_terminal())
            .count()
    }
}

impl Connector for LoopbackConnector {
    fn open(
        &self,
        room: &RoomId,
        credential: &Credential,
        callback: EventCallback,
    ) -> ChannelHandle {
        let (handle, driver) = ChannelHandle::new(room.clone(), callback);
        let remote = LoopbackRemote::new(room.clone(), credential.clone(), driver);
        if self.auto_accept {
            let accepting = remote.clone();
            tokio::spawn(async move {
                accepting.accept();
            });
        }
        self.remotes.lock().push(remote);
        handle
    }
}
