use std::time::Duration;

use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::instrument;
use uuid::Uuid;

use parley_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{encode_ts, now_ts};

/// Opaque login tokens issued by the REST surface and presented again on
/// the WebSocket upgrade.
#[derive(Clone)]
pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Issue a new token for `user_id`. `ttl = None` never expires.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn create(&self, user_id: UserId, ttl: Option<Duration>) -> Result<String, StoreError> {
        let token = Uuid::new_v4().simple().to_string();
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|e| StoreError::InvalidRow(format!("ttl out of range: {e}")))?;
                Some(encode_ts(&(Utc::now() + ttl)))
            }
            None => None,
        };
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![token, user_id.get(), now_ts(), expires_at],
            )?;
            Ok(())
        })?;
        Ok(token)
    }

    /// The user owning `token`, or `None` if it is unknown or expired.
    #[instrument(skip_all)]
    pub fn resolve(&self, token: &str) -> Result<Option<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            let user: Option<i64> = conn
                .query_row(
                    "SELECT user_id FROM sessions
                     WHERE token = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                    rusqlite::params![token, now_ts()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(user.map(UserId::new))
        })
    }

    /// Delete a token. Returns whether it existed.
    #[instrument(skip_all)]
    pub fn revoke(&self, token: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?;
            Ok(removed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SessionRepo {
        SessionRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn token_resolves_to_user() {
        let repo = repo();
        let token = repo.create(UserId::new(7), None).unwrap();
        assert_eq!(repo.resolve(&token).unwrap(), Some(UserId::new(7)));
    }

    #[test]
    fn tokens_are_unique() {
        let repo = repo();
        let a = repo.create(UserId::new(1), None).unwrap();
        let b = repo.create(UserId::new(1), None).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn unknown_token_resolves_to_none() {
        let repo = repo();
        assert_eq!(repo.resolve("nope").unwrap(), None);
    }

    #[test]
    fn expired_token_resolves_to_none() {
        let repo = repo();
        let token = repo
            .create(UserId::new(1), Some(Duration::from_millis(1)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(repo.resolve(&token).unwrap(), None);
    }

    #[test]
    fn unexpired_token_resolves() {
        let repo = repo();
        let token = repo
            .create(UserId::new(1), Some(Duration::from_secs(3600)))
            .unwrap();
        assert_eq!(repo.resolve(&token).unwrap(), Some(UserId::new(1)));
    }

    #[test]
    fn revoke_removes_token() {
        let repo = repo();
        let token = repo.create(UserId::new(1), None).unwrap();
        assert!(repo.revoke(&token).unwrap());
        assert!(!repo.revoke(&token).unwrap());
        assert_eq!(repo.resolve(&token).unwrap(), None);
    }
}
