use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use parley_core::ids::{ConversationId, MessageId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::gateway::NewMessage;
use crate::row_helpers::{decode_ts, encode_ts};

#[derive(Clone, Debug, Serialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: Option<UserId>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a message. Fails if the conversation does not exist.
    #[instrument(skip(self, message), fields(conversation_id = %message.conversation_id, sender_id = %message.sender_id))]
    pub fn create(&self, message: &NewMessage) -> Result<MessageId, StoreError> {
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO messages (conversation_id, sender_id, receiver_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message.conversation_id.get(),
                    message.sender_id.get(),
                    message.receiver_id.map(UserId::get),
                    message.content,
                    encode_ts(&message.sent_at),
                ],
            )?;
            Ok(MessageId::new(conn.last_insert_rowid()))
        })
    }

    /// The most recent `limit` messages of a conversation, oldest first.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn list(
        &self,
        conversation_id: ConversationId,
        limit: u32,
    ) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, receiver_id, content, created_at
                 FROM (SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2)
                 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query(rusqlite::params![conversation_id.get(), limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                let created_at: String = row.get(5)?;
                results.push(MessageRow {
                    id: MessageId::new(row.get(0)?),
                    conversation_id: ConversationId::new(row.get(1)?),
                    sender_id: UserId::new(row.get(2)?),
                    receiver_id: row.get::<_, Option<i64>>(3)?.map(UserId::new),
                    content: row.get(4)?,
                    created_at: decode_ts(&created_at)?,
                });
            }
            Ok(results)
        })
    }
}
