//! Cloneable front door to a running [`Hub`](super::Hub).

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Sink, Stream, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info};

use parley_core::events::ChatEvent;
use parley_core::ids::UserId;

use super::registry::OnlineSnapshot;
use super::HubConfig;
use crate::metrics::WS_CONNECTIONS_TOTAL;
use crate::websocket::heartbeat::HeartbeatConfig;
use crate::websocket::pumps::{self, ConnectionTasks};
use crate::websocket::ConnectionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("hub is not running")]
pub struct HubClosed;

#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::UnboundedSender<Arc<ConnectionHandle>>,
    unregister_tx: mpsc::UnboundedSender<Arc<ConnectionHandle>>,
    events_tx: mpsc::Sender<ChatEvent>,
    online: OnlineSnapshot,
    send_queue_capacity: usize,
    heartbeat: HeartbeatConfig,
}

/// Receiving ends of the hub's three inbound channels.
pub(crate) struct HubChannels {
    pub(crate) register_rx: mpsc::UnboundedReceiver<Arc<ConnectionHandle>>,
    pub(crate) unregister_rx: mpsc::UnboundedReceiver<Arc<ConnectionHandle>>,
    pub(crate) events_rx: mpsc::Receiver<ChatEvent>,
}

pub(crate) fn channels(config: &HubConfig) -> (HubHandle, HubChannels) {
    let (register_tx, register_rx) = mpsc::unbounded_channel();
    let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
    let handle = HubHandle {
        register_tx,
        unregister_tx,
        events_tx,
        online: OnlineSnapshot::default(),
        send_queue_capacity: config.send_queue_capacity,
        heartbeat: config.heartbeat,
    };
    let channels = HubChannels {
        register_rx,
        unregister_rx,
        events_rx,
    };
    (handle, channels)
}

impl HubHandle {
    /// Ask the hub to admit `conn`. If the hub is gone the connection is retired.
    pub fn register(&self, conn: Arc<ConnectionHandle>) {
        if let Err(mpsc::error::SendError(conn)) = self.register_tx.send(conn) {
            debug!(conn_id = %conn.id(), "hub stopped, retiring connection");
            let _ = conn.retire();
        }
    }

    /// Ask the hub to drop `conn`. Safe to call any number of times.
    pub fn unregister(&self, conn: Arc<ConnectionHandle>) {
        let _ = conn.retire();
        let _ = self.unregister_tx.send(conn);
    }

    /// Hand a decoded inbound event to the hub, waiting for buffer space.
    pub async fn submit(&self, event: ChatEvent) -> Result<(), HubClosed> {
        self.events_tx.send(event).await.map_err(|_| HubClosed)
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.online.contains(user_id)
    }

    /// Online user ids, ascending.
    pub fn online_user_ids(&self) -> Vec<UserId> {
        self.online.user_ids()
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    pub(crate) fn online_snapshot(&self) -> OnlineSnapshot {
        self.online.clone()
    }

    /// Turn an authenticated, upgraded socket into a live connection:
    /// build its handle, request registration and spawn both pumps.
    pub fn attach<S, E>(&self, user_id: UserId, socket: S) -> ConnectionTasks
    where
        S: Stream<Item = Result<Message, E>> + Sink<Message> + Send + 'static,
        <S as Sink<Message>>::Error: Display + Send,
        E: Display + Send + 'static,
    {
        let (conn, rx) = ConnectionHandle::new(user_id, self.send_queue_capacity);
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        info!(user_id = %user_id, conn_id = %conn.id(), "connection attached");

        self.register(conn.clone());
        let (sink, stream) = socket.split();
        pumps::spawn(self.clone(), conn, rx, sink, stream, self.heartbeat)
    }
}
