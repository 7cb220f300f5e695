//! Who is online, and through which connection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use parley_core::ids::{ConnectionId, UserId};

use crate::websocket::ConnectionHandle;

/// Read-only view of the online user set, shared with HTTP handlers.
///
/// Only the hub loop writes it, always in step with its registry.
#[derive(Clone, Debug, Default)]
pub struct OnlineSnapshot {
    users: Arc<RwLock<HashSet<UserId>>>,
}

impl OnlineSnapshot {
    pub fn contains(&self, user_id: UserId) -> bool {
        self.users.read().contains(&user_id)
    }

    /// Online users in ascending id order.
    pub fn user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<_> = self.users.read().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

/// The hub's user → connection map. Owned by the hub loop; not shared.
pub(crate) struct Registry {
    entries: HashMap<UserId, Arc<ConnectionHandle>>,
    online: OnlineSnapshot,
}

impl Registry {
    pub(crate) fn new(online: OnlineSnapshot) -> Self {
        Self {
            entries: HashMap::new(),
            online,
        }
    }

    /// Insert `conn`, returning the connection it replaced.
    pub(crate) fn insert(&mut self, conn: Arc<ConnectionHandle>) -> Option<Arc<ConnectionHandle>> {
        let user_id = conn.user_id();
        let previous = self.entries.insert(user_id, conn);
        let _ = self.online.users.write().insert(user_id);
        previous
    }

    /// Remove the entry for `user_id` only if it is still `conn_id`.
    pub(crate) fn remove_if(
        &mut self,
        user_id: UserId,
        conn_id: &ConnectionId,
    ) -> Option<Arc<ConnectionHandle>> {
        if self.entries.get(&user_id)?.id() != conn_id {
            return None;
        }
        let removed = self.entries.remove(&user_id);
        let _ = self.online.users.write().remove(&user_id);
        removed
    }

    pub(crate) fn get(&self, user_id: UserId) -> Option<&Arc<ConnectionHandle>> {
        self.entries.get(&user_id)
    }

    pub(crate) fn user_ids(&self) -> Vec<UserId> {
        self.entries.keys().copied().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn drain(&mut self) -> Vec<Arc<ConnectionHandle>> {
        self.online.users.write().clear();
        self.entries.drain().map(|(_, conn)| conn).collect()
    }
}
