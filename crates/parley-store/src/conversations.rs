use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::Serialize;
use tracing::{debug, instrument};

use parley_core::ids::{ConversationId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{decode_ts, now_ts};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Private,
    Group,
}

impl std::str::FromStr for ConversationKind {
    type Err = StoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "group" => Ok(Self::Group),
            other => Err(StoreError::InvalidRow(format!(
                "unknown conversation kind: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ConversationRow {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Return the private conversation between `a` and `b`, creating it on
    /// first use. The pair is unordered: `(a, b)` and `(b, a)` resolve to the
    /// same conversation.
    #[instrument(skip(self), fields(a = %a, b = %b))]
    pub fn find_or_create_private(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<ConversationId, StoreError> {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let now = now_ts();
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO conversations (kind, user_low, user_high, created_at, updated_at)
                 VALUES ('private', ?1, ?2, ?3, ?3)",
                rusqlite::params![low.get(), high.get(), now],
            )?;

            let id: i64 = tx.query_row(
                "SELECT id FROM conversations WHERE kind = 'private' AND user_low = ?1 AND user_high = ?2",
                rusqlite::params![low.get(), high.get()],
                |row| row.get(0),
            )?;

            if inserted == 1 {
                for user in [low, high] {
                    let _ = tx.execute(
                        "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id, joined_at)
                         VALUES (?1, ?2, ?3)",
                        rusqlite::params![id, user.get(), now],
                    )?;
                }
                debug!(conversation_id = id, "private conversation created");
            }

            tx.commit()?;
            Ok(ConversationId::new(id))
        })
    }

    /// Create a group conversation with the given members.
    #[instrument(skip(self, members), fields(members = members.len()))]
    pub fn create_group(
        &self,
        title: &str,
        members: &[UserId],
    ) -> Result<ConversationId, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let now = now_ts();
            let _ = tx.execute(
                "INSERT INTO conversations (kind, title, created_at, updated_at)
                 VALUES ('group', ?1, ?2, ?2)",
                rusqlite::params![title, now],
            )?;
            let id = tx.last_insert_rowid();
            for user in members {
                let _ = tx.execute(
                    "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id, joined_at)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![id, user.get(), now],
                )?;
            }
            tx.commit()?;
            Ok(ConversationId::new(id))
        })
    }

    /// Members of a conversation, ordered by user id.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn members(&self, id: ConversationId) -> Result<Vec<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT id FROM conversations WHERE id = ?1",
                    [id.get()],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }

            let mut stmt = conn.prepare(
                "SELECT user_id FROM conversation_members WHERE conversation_id = ?1 ORDER BY user_id",
            )?;
            let members = stmt
                .query_map([id.get()], |row| row.get::<_, i64>(0))?
                .map(|r| r.map(UserId::new))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(members)
        })
    }

    /// Bump `updated_at` so the conversation sorts as recently active.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn touch(&self, id: ConversationId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now_ts(), id.get()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn get(&self, id: ConversationId) -> Result<ConversationRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, title, created_at, updated_at FROM conversations WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.get()])?;
            match rows.next()? {
                Some(row) => {
                    let kind: String = row.get(1)?;
                    let created_at: String = row.get(3)?;
                    let updated_at: String = row.get(4)?;
                    Ok(ConversationRow {
                        id: ConversationId::new(row.get(0)?),
                        kind: kind.parse()?,
                        title: row.get(2)?,
                        created_at: decode_ts(&created_at)?,
                        updated_at: decode_ts(&updated_at)?,
                    })
                }
                None => Err(StoreError::NotFound(format!("conversation {id}"))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> ConversationRepo {
        ConversationRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn private_conversation_created_once() {
        let repo = repo();
        let first = repo
            .find_or_create_private(UserId::new(1), UserId::new(2))
            .unwrap();
        let second = repo
            .find_or_create_private(UserId::new(1), UserId::new(2))
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn private_pair_is_unordered() {
        let repo = repo();
        let ab = repo
            .find_or_create_private(UserId::new(1), UserId::new(2))
            .unwrap();
        let ba = repo
            .find_or_create_private(UserId::new(2), UserId::new(1))
            .unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn distinct_pairs_get_distinct_conversations() {
        let repo = repo();
        let ab = repo
            .find_or_create_private(UserId::new(1), UserId::new(2))
            .unwrap();
        let ac = repo
            .find_or_create_private(UserId::new(1), UserId::new(3))
            .unwrap();
        assert_ne!(ab, ac);
    }

    #[test]
    fn private_conversation_has_both_members() {
        let repo = repo();
        let id = repo
            .find_or_create_private(UserId::new(5), UserId::new(3))
            .unwrap();
        assert_eq!(
            repo.members(id).unwrap(),
            vec![UserId::new(3), UserId::new(5)]
        );
        assert_eq!(repo.get(id).unwrap().kind, ConversationKind::Private);
    }

    #[test]
    fn self_conversation_has_single_member() {
        let repo = repo();
        let id = repo
            .find_or_create_private(UserId::new(4), UserId::new(4))
            .unwrap();
        assert_eq!(repo.members(id).unwrap(), vec![UserId::new(4)]);
    }

    #[test]
    fn group_members_and_title() {
        let repo = repo();
        let id = repo
            .create_group("climbers", &[UserId::new(3), UserId::new(1), UserId::new(2)])
            .unwrap();
        let row = repo.get(id).unwrap();
        assert_eq!(row.kind, ConversationKind::Group);
        assert_eq!(row.title.as_deref(), Some("climbers"));
        assert_eq!(
            repo.members(id).unwrap(),
            vec![UserId::new(1), UserId::new(2), UserId::new(3)]
        );
    }

    #[test]
    fn groups_do_not_collide_with_private_pairs() {
        let repo = repo();
        let g1 = repo.create_group("a", &[UserId::new(1)]).unwrap();
        let g2 = repo.create_group("b", &[UserId::new(1)]).unwrap();
        assert_ne!(g1, g2);
    }

    #[test]
    fn members_of_missing_conversation() {
        let repo = repo();
        let err = repo.members(ConversationId::new(999)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn touch_advances_updated_at() {
        let repo = repo();
        let id = repo
            .find_or_create_private(UserId::new(1), UserId::new(2))
            .unwrap();
        let before = repo.get(id).unwrap().updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        repo.touch(id).unwrap();
        let after = repo.get(id).unwrap().updated_at;
        assert!(after > before);
    }

    #[test]
    fn touch_missing_conversation() {
        let repo = repo();
        assert!(matches!(
            repo.touch(ConversationId::new(42)),
            Err(StoreError::NotFound(_))
        ));
    }
}
