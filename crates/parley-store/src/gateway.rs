//! The narrow persistence surface the hub depends on.
//!
//! The hub holds an `Arc<dyn MessageStore>` so tests can swap in fakes that
//! record calls, fail, or panic. [`SqliteMessageStore`] is the production
//! implementation and runs every repo call on the blocking pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use parley_core::ids::{ConversationId, MessageId, UserId};

use crate::conversations::ConversationRepo;
use crate::database::Database;
use crate::error::StoreError;
use crate::messages::MessageRepo;

/// A message ready to be persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// `None` for group messages.
    pub receiver_id: Option<UserId>,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn find_or_create_private_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<ConversationId, StoreError>;

    async fn create_message(&self, message: NewMessage) -> Result<MessageId, StoreError>;

    async fn touch_conversation(&self, conversation_id: ConversationId) -> Result<(), StoreError>;

    async fn conversation_members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, StoreError>;
}

#[derive(Clone)]
pub struct SqliteMessageStore {
    conversations: ConversationRepo,
    messages: MessageRepo,
}

impl SqliteMessageStore {
    pub fn new(db: Database) -> Self {
        Self {
            conversations: ConversationRepo::new(db.clone()),
            messages: MessageRepo::new(db),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> Result<T, StoreError> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(&this)).await?
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn find_or_create_private_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<ConversationId, StoreError> {
        self.blocking(move |s| s.conversations.find_or_create_private(a, b))
            .await
    }

    async fn create_message(&self, message: NewMessage) -> Result<MessageId, StoreError> {
        self.blocking(move |s| s.messages.create(&message)).await
    }

    async fn touch_conversation(&self, conversation_id: ConversationId) -> Result<(), StoreError> {
        self.blocking(move |s| s.conversations.touch(conversation_id))
            .await
    }

    async fn conversation_members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, StoreError> {
        self.blocking(move |s| s.conversations.members(conversation_id))
            .await
    }
}
