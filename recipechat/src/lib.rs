//! `RecipeChat` direct-messaging core.
//!
//! Lets a signed-in user list the people they can message, open a one-to-one
//! conversation, read its history and exchange messages in real time. The
//! [`session::ConversationSession`] orchestrates the lower layers:
//!
//! - [`identity`]: caller identity from the session credential
//! - [`directory`]: messageable contacts
//! - [`room`]: the room shared with a peer
//! - [`history`]: stored messages of a room
//! - [`channel`]: realtime push connection to a room
//! - [`api`]: REST backend seam used by the above

pub mod api;
pub mod channel;
pub mod config;
pub mod directory;
pub mod error;
pub mod history;
pub mod identity;
pub mod room;
pub mod session;
