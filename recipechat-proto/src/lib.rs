//! Shared wire definitions for the `RecipeChat` messaging core.

pub mod credential;
pub mod message;
pub mod room;
pub mod user;
