//! The messaging hub.
//!
//! A single task owns the registry of online users. Register, unregister
//! and inbound chat events arrive over three channels and are applied one at
//! a time, so registry mutation never needs a lock. Everything outside the
//! loop talks to it through a [`HubHandle`].

pub mod handle;
mod registry;
mod routing;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use parley_core::events::{ChatEvent, EventKind, PresenceStatus};
use parley_core::ids::{ConversationId, UserId};
use parley_store::{MessageStore, StoreError};

pub use handle::{HubClosed, HubHandle};
pub use registry::OnlineSnapshot;

use self::handle::HubChannels;
use self::registry::Registry;
use crate::metrics::{
    HUB_DELIVERY_DROPS_TOTAL, HUB_EVENT_PANICS_TOTAL, HUB_PERSISTENCE_ERRORS_TOTAL,
    WS_CONNECTIONS_ACTIVE, WS_DISCONNECTIONS_TOTAL,
};
use crate::settings::ParleySettings;
use crate::websocket::{ConnectionHandle, HeartbeatConfig};

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub send_queue_capacity: usize,
    pub event_buffer: usize,
    pub max_content_len: usize,
    pub notify_send_failures: bool,
    pub broadcast_presence: bool,
    pub heartbeat: HeartbeatConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from_settings(&ParleySettings::default())
    }
}

impl HubConfig {
    pub fn from_settings(settings: &ParleySettings) -> Self {
        Self {
            send_queue_capacity: settings.hub.send_queue_capacity,
            event_buffer: settings.hub.event_buffer,
            max_content_len: settings.hub.max_content_len,
            notify_send_failures: settings.hub.notify_send_failures,
            broadcast_presence: settings.hub.broadcast_presence,
            heartbeat: HeartbeatConfig {
                interval: settings.heartbeat.interval(),
                pong_timeout: settings.heartbeat.pong_timeout(),
            },
        }
    }
}

/// Why a single inbound event was not delivered.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("message content is empty")]
    EmptyContent,

    #[error("message content is {len} characters, limit is {max}")]
    ContentTooLong { len: usize, max: usize },

    #[error("message has neither receiver_id nor conversation_id")]
    MissingRecipient,

    #[error("user {user_id} is not a member of conversation {conversation_id}")]
    NotMember {
        user_id: UserId,
        conversation_id: ConversationId,
    },

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct Hub {
    registry: Registry,
    store: Arc<dyn MessageStore>,
    config: HubConfig,
    register_rx: mpsc::UnboundedReceiver<Arc<ConnectionHandle>>,
    unregister_rx: mpsc::UnboundedReceiver<Arc<ConnectionHandle>>,
    events_rx: mpsc::Receiver<ChatEvent>,
    shutdown: CancellationToken,
    /// Users who went offline during the current command.
    departed: Vec<UserId>,
}

impl Hub {
    pub fn new(
        store: Arc<dyn MessageStore>,
        config: HubConfig,
        shutdown: CancellationToken,
    ) -> (Self, HubHandle) {
        let (handle, channels) = handle::channels(&config);
        let HubChannels {
            register_rx,
            unregister_rx,
            events_rx,
        } = channels;
        let hub = Self {
            registry: Registry::new(handle.online_snapshot()),
            store,
            config,
            register_rx,
            unregister_rx,
            events_rx,
            shutdown,
            departed: Vec::new(),
        };
        (hub, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown is signalled or every handle has been dropped.
    pub async fn run(mut self) {
        info!("hub started");
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                // Every handle owns all three senders, so a closed register
                // channel means no handle is left.
                conn = self.register_rx.recv() => match conn {
                    Some(conn) => self.register(conn),
                    None => break,
                },
                Some(conn) = self.unregister_rx.recv() => self.unregister(&conn),
                Some(event) = self.events_rx.recv() => self.dispatch(event).await,
            }
            self.settle_departures();
        }
        self.close_all();
        info!("hub stopped");
    }

    fn register(&mut self, conn: Arc<ConnectionHandle>) {
        let user_id = conn.user_id();
        if conn.is_retired() {
            debug!(user_id = %user_id, conn_id = %conn.id(), "connection closed before registration, skipping");
            return;
        }

        let previous = self.registry.insert(conn.clone());
        if let Some(prev) = &previous {
            info!(user_id = %user_id, old_conn = %prev.id(), new_conn = %conn.id(), "replacing previous connection");
            self.closed(prev, "replaced");
        }
        self.update_gauge();

        let ack = ChatEvent::connection_success(user_id)
            .to_json()
            .map(Arc::new);
        let queued = match ack {
            Ok(ack) => conn.try_send(ack).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = queued {
            warn!(user_id = %user_id, conn_id = %conn.id(), reason, "could not queue connection ack");
            // Only a user whose earlier connection was replaced was ever announced online.
            if self.remove(&conn, "ack failed") && previous.is_some() {
                self.departed.push(user_id);
            }
            return;
        }

        info!(user_id = %user_id, conn_id = %conn.id(), online = self.registry.len(), "user registered");
        if previous.is_none() {
            self.announce(user_id, PresenceStatus::Online);
        }
    }

    fn unregister(&mut self, conn: &Arc<ConnectionHandle>) {
        if self.remove(conn, "unregistered") {
            self.departed.push(conn.user_id());
        } else {
            let _ = conn.retire();
            debug!(user_id = %conn.user_id(), conn_id = %conn.id(), "stale unregister ignored");
        }
    }

    /// Handle one inbound event in isolation: an error or panic here is
    /// logged and never reaches the loop.
    async fn dispatch(&mut self, event: ChatEvent) {
        let sender = event.sender_id;
        let kind = event.kind;
        match AssertUnwindSafe(self.route(event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if matches!(err, HubError::Store(_)) {
                    counter!(HUB_PERSISTENCE_ERRORS_TOTAL).increment(1);
                }
                warn!(sender_id = %sender, kind = %kind, error = %err, "event aborted");
                if kind == EventKind::MessageSend {
                    self.notify_failure(sender, &err);
                }
            }
            Err(panic) => {
                counter!(HUB_EVENT_PANICS_TOTAL).increment(1);
                error!(sender_id = %sender, kind = %kind, panic = %panic_message(&panic), "panic while handling event");
            }
        }
    }

    /// Queue `payload` for `user_id` if online. A recipient that cannot take
    /// it is evicted. Returns whether the payload was queued.
    fn deliver(&mut self, user_id: UserId, payload: &Arc<String>) -> bool {
        let Some(conn) = self.registry.get(user_id).cloned() else {
            debug!(user_id = %user_id, "recipient offline");
            return false;
        };
        match conn.try_send(Arc::clone(payload)) {
            Ok(()) => true,
            Err(e) => {
                counter!(HUB_DELIVERY_DROPS_TOTAL).increment(1);
                warn!(user_id = %user_id, conn_id = %conn.id(), reason = %e, "recipient not draining, unregistering");
                self.evict(&conn, "send queue unavailable");
                false
            }
        }
    }

    fn evict(&mut self, conn: &Arc<ConnectionHandle>, reason: &'static str) {
        if self.remove(conn, reason) {
            self.departed.push(conn.user_id());
        }
    }

    /// Drop `conn` from the registry if it is still the current entry.
    fn remove(&mut self, conn: &Arc<ConnectionHandle>, reason: &'static str) -> bool {
        if self.registry.remove_if(conn.user_id(), conn.id()).is_none() {
            return false;
        }
        self.closed(conn, reason);
        self.update_gauge();
        true
    }

    fn notify_failure(&mut self, user_id: UserId, err: &HubError) {
        if !self.config.notify_send_failures {
            return;
        }
        match ChatEvent::error(user_id, err.to_string()).to_json() {
            Ok(json) => {
                let _ = self.deliver(user_id, &Arc::new(json));
            }
            Err(e) => warn!(error = %e, "failed to encode error event"),
        }
    }

    /// Tell every other online user that `user_id` came or went.
    fn announce(&mut self, user_id: UserId, status: PresenceStatus) {
        if !self.config.broadcast_presence {
            return;
        }
        let payload = match ChatEvent::presence(user_id, status).to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(error = %e, "failed to encode presence event");
                return;
            }
        };
        for peer in self.registry.user_ids() {
            if peer != user_id {
                let _ = self.deliver(peer, &payload);
            }
        }
    }

    /// Announce users who went offline. Announcing can evict more users,
    /// so this runs until no departures remain.
    fn settle_departures(&mut self) {
        while let Some(user_id) = self.departed.pop() {
            if self.registry.get(user_id).is_none() {
                self.announce(user_id, PresenceStatus::Offline);
            }
        }
    }

    fn closed(&self, conn: &ConnectionHandle, reason: &'static str) {
        let _ = conn.retire();
        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        let connected_ms = u64::try_from(conn.connected_at().elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(user_id = %conn.user_id(), conn_id = %conn.id(), reason, connected_ms, "connection closed");
    }

    fn update_gauge(&self) {
        #[allow(clippy::cast_precision_loss)]
        gauge!(WS_CONNECTIONS_ACTIVE).set(self.registry.len() as f64);
    }

    fn close_all(&mut self) {
        for conn in self.registry.drain() {
            self.closed(&conn, "hub shutdown");
        }
        self.departed.clear();
        self.update_gauge();
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
