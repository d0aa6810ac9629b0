//! In-memory user roster, room registry and message log.
//!
//! Rooms are created lazily on first negotiation between two users and keyed
//! by [`RoomId::for_pair`], so repeated negotiation for the same pair always
//! returns the same room. Each room keeps its messages in creation order and a
//! broadcast sender that fans new messages out to every connected subscriber.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use recipechat_proto::message::{Message, MessageId};
use recipechat_proto::room::RoomId;
use recipechat_proto::user::{Contact, UserId};
use tokio::sync::{RwLock, broadcast};

/// Capacity of each room's broadcast buffer.
const ROOM_BROADCAST_CAPACITY: usize = 256;

/// Errors returned by [`BackendStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A user tried to open a conversation with themselves.
    #[error("cannot open a conversation with yourself")]
    SelfConversation,

    /// The referenced user is not in the roster.
    #[error("unknown user {0}")]
    UnknownUser(UserId),

    /// The referenced room does not exist.
    #[error("unknown room {0}")]
    UnknownRoom(RoomId),

    /// The caller is not one of the room's two participants.
    #[error("user {user} is not a participant of {room}")]
    NotParticipant {
        /// The rejected caller.
        user: UserId,
        /// The room they tried to access.
        room: RoomId,
    },
}

/// One two-party conversation.
struct RoomRecord {
    participants: [UserId; 2],
    messages: Vec<Message>,
    feed: broadcast::Sender<Message>,
}

impl RoomRecord {
    fn new(a: UserId, b: UserId) -> Self {
        let (feed, _) = broadcast::channel(ROOM_BROADCAST_CAPACITY);
        Self {
            participants: [a, b],
            messages: Vec::new(),
            feed,
        }
    }

    fn admits(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }
}

/// Thread-safe backend storage.
pub struct BackendStore {
    users: RwLock<Vec<Contact>>,
    rooms: RwLock<HashMap<RoomId, RoomRecord>>,
    rooms_created: AtomicUsize,
}

impl Default for BackendStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl BackendStore {
    /// Creates a store seeded with the given roster.
    #[must_use]
    pub fn new(users: Vec<Contact>) -> Self {
        Self {
            users: RwLock::new(users),
            rooms: RwLock::new(HashMap::new()),
            rooms_created: AtomicUsize::new(0),
        }
    }

    /// Adds a user to the roster, replacing any entry with the same id.
    pub async fn add_user(&self, contact: Contact) {
        let mut users = self.users.write().await;
        users.retain(|u| u.id != contact.id);
        users.push(contact);
    }

    /// Returns the full roster in insertion order.
    pub async fn contacts(&self) -> Vec<Contact> {
        self.users.read().await.clone()
    }

    /// Whether the user is in the roster.
    pub async fn has_user(&self, id: &UserId) -> bool {
        self.users.read().await.iter().any(|u| &u.id == id)
    }

    /// Returns the room for (caller, peer), creating it on first use.
    ///
    /// # Errors
    ///
    /// [`StoreError::SelfConversation`] if `peer == caller`, or
    /// [`StoreError::UnknownUser`] if the peer is not in the roster.
    pub async fn get_or_create_room(
        &self,
        caller: &UserId,
        peer: &UserId,
    ) -> Result<RoomId, StoreError> {
        if caller == peer {
            return Err(StoreError::SelfConversation);
        }
        if !self.has_user(peer).await {
            return Err(StoreError::UnknownUser(peer.clone()));
        }

        let room = RoomId::for_pair(caller, peer);
        let mut rooms = self.rooms.write().await;
        if !rooms.contains_key(&room) {
            rooms.insert(room.clone(), RoomRecord::new(caller.clone(), peer.clone()));
            let total = self.rooms_created.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::info!(room = %room, total, "room created");
        }
        drop(rooms);
        Ok(room)
    }

    /// Number of rooms created since startup.
    pub fn rooms_created(&self) -> usize {
        self.rooms_created.load(Ordering::SeqCst)
    }

    /// Returns the room's messages in ascending creation order.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownRoom`] or [`StoreError::NotParticipant`].
    pub async fn messages(&self, room: &RoomId, caller: &UserId) -> Result<Vec<Message>, StoreError> {
        let rooms = self.rooms.read().await;
        let record = Self::admitted(&rooms, room, caller)?;
        Ok(record.messages.clone())
    }

    /// Subscribes the caller to new messages in the room.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownRoom`] or [`StoreError::NotParticipant`].
    pub async fn subscribe(
        &self,
        room: &RoomId,
        caller: &UserId,
    ) -> Result<broadcast::Receiver<Message>, StoreError> {
        let rooms = self.rooms.read().await;
        let record = Self::admitted(&rooms, room, caller)?;
        Ok(record.feed.subscribe())
    }

    /// Stamps, persists and broadcasts a message from `sender`.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownRoom`] or [`StoreError::NotParticipant`].
    pub async fn post(
        &self,
        room: &RoomId,
        sender: &UserId,
        body: String,
    ) -> Result<Message, StoreError> {
        let mut rooms = self.rooms.write().await;
        let record = rooms
            .get_mut(room)
            .ok_or_else(|| StoreError::UnknownRoom(room.clone()))?;
        if !record.admits(sender) {
            return Err(StoreError::NotParticipant {
                user: sender.clone(),
                room: room.clone(),
            });
        }

        let message = Message {
            sender: sender.clone(),
            message: body,
            timestamp: Utc::now(),
            id: Some(MessageId::generate()),
        };
        record.messages.push(message.clone());
        // No subscribers is fine: the message is persisted either way.
        let receivers = record.feed.send(message.clone()).unwrap_or(0);
        drop(rooms);

        tracing::debug!(room = %room, sender = %sender, receivers, "message posted");
        Ok(message)
    }

    fn admitted<'a>(
        rooms: &'a HashMap<RoomId, RoomRecord>,
        room: &RoomId,
        caller: &UserId,
    ) -> Result<&'a RoomRecord, StoreError> {
        let record = rooms
            .get(room)
            .ok_or_else(|| StoreError::UnknownRoom(room.clone()))?;
        if record.admits(caller) {
            Ok(record)
        } else {
            Err(StoreError::NotParticipant {
                user: caller.clone(),
                room: room.clone(),
            })
        }
    }
}
