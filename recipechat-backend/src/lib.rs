//! `RecipeChat` development backend library.
//!
//! An in-memory stand-in for the REST and realtime services the messaging
//! core talks to: a contact roster, idempotent two-party room negotiation,
//! message history, and a per-room WebSocket broadcast channel. Exposed as a
//! library so integration tests can run it in-process.

pub mod config;
pub mod server;
pub mod store;
