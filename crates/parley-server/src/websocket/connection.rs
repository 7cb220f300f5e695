//! Per-connection state shared between the hub and the two pumps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use parley_core::ids::{ConnectionId, UserId};

use super::heartbeat::Liveness;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("send queue full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// One authenticated WebSocket connection.
///
/// The hub only ever touches a connection through [`try_send`](Self::try_send)
/// and [`retire`](Self::retire); the transport itself belongs to the pumps.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    tx: mpsc::Sender<Arc<String>>,
    retired: CancellationToken,
    closed: AtomicBool,
    liveness: Liveness,
    connected_at: Instant,
}

impl ConnectionHandle {
    /// Create a connection with an outbound queue of `capacity` frames.
    pub fn new(user_id: UserId, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Arc::new(Self {
            id: ConnectionId::new(),
            user_id,
            tx,
            retired: CancellationToken::new(),
            closed: AtomicBool::new(false),
            liveness: Liveness::new(),
            connected_at: Instant::now(),
        });
        (handle, rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Queue a serialized event without waiting.
    pub fn try_send(&self, message: Arc<String>) -> Result<(), DeliveryError> {
        if self.is_retired() {
            return Err(DeliveryError::Closed);
        }
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Close the connection. Returns `true` only for the call that closed it.
    pub fn retire(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.retired.cancel();
        }
        first
    }

    pub fn is_retired(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the connection has been retired.
    pub async fn retired(&self) {
        self.retired.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_is_fifo() {
        let (conn, mut rx) = ConnectionHandle::new(UserId::new(1), 8);
        for i in 0..3 {
            conn.try_send(Arc::new(format!("m{i}"))).unwrap();
        }
        for i in 0..3 {
            assert_eq!(*rx.recv().await.unwrap(), format!("m{i}"));
        }
    }

    #[test]
    fn full_queue_reports_full() {
        let (conn, _rx) = ConnectionHandle::new(UserId::new(1), 1);
        conn.try_send(Arc::new("a".into())).unwrap();
        assert_eq!(conn.try_send(Arc::new("b".into())), Err(DeliveryError::Full));
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let (conn, rx) = ConnectionHandle::new(UserId::new(1), 4);
        drop(rx);
        assert_eq!(conn.try_send(Arc::new("a".into())), Err(DeliveryError::Closed));
    }

    #[test]
    fn retire_happens_once() {
        let (conn, _rx) = ConnectionHandle::new(UserId::new(1), 4);
        assert!(!conn.is_retired());
        assert!(conn.retire());
        assert!(!conn.retire());
        assert!(conn.is_retired());
    }

    #[test]
    fn retired_connection_refuses_sends() {
        let (conn, _rx) = ConnectionHandle::new(UserId::new(1), 4);
        let _ = conn.retire();
        assert_eq!(conn.try_send(Arc::new("a".into())), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn retired_future_resolves() {
        let (conn, _rx) = ConnectionHandle::new(UserId::new(1), 4);
        let waiter = conn.clone();
        let handle = tokio::spawn(async move { waiter.retired().await });
        let _ = conn.retire();
        handle.await.unwrap();
    }

    #[test]
    fn successive_connections_get_distinct_ids() {
        let (a, _ra) = ConnectionHandle::new(UserId::new(1), 1);
        let (b, _rb) = ConnectionHandle::new(UserId::new(1), 1);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.user_id(), b.user_id());
    }
}
