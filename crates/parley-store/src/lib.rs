//! # parley-store
//!
//! SQLite-backed persistence for the messaging hub: conversations and their
//! members, messages, and login sessions. The hub talks to this crate only
//! through the [`MessageStore`] gateway trait.

#![deny(unsafe_code)]

pub mod conversations;
pub mod database;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod row_helpers;
pub mod schema;
pub mod sessions;

pub use conversations::{ConversationKind, ConversationRepo, ConversationRow};
pub use database::Database;
pub use error::StoreError;
pub use gateway::{MessageStore, NewMessage, SqliteMessageStore};
pub use messages::{MessageRepo, MessageRow};
pub use sessions::SessionRepo;
