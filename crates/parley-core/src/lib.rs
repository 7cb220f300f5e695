//! # parley-core
//!
//! Shared identifiers and the chat event wire model exchanged between
//! connections and the hub.

#![deny(unsafe_code)]

pub mod events;
pub mod ids;

pub use events::{ChatEvent, EventKind, PresenceStatus};
pub use ids::{ConnectionId, ConversationId, MessageId, UserId};
