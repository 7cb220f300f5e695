//! The two tasks behind every connection.
//!
//! The write pump drains the outbound queue onto the socket and pings on a
//! timer. The read pump decodes inbound frames and submits them to the hub.
//! Whichever exits first retires the connection, which stops the other, and
//! both then ask the hub to unregister it.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tracing::{debug, info, warn};

use parley_core::events::ChatEvent;

use super::connection::ConnectionHandle;
use super::heartbeat::HeartbeatConfig;
use crate::hub::HubHandle;
use crate::metrics::HUB_DECODE_ERRORS_TOTAL;

/// Join handles for a connection's pumps.
pub struct ConnectionTasks {
    pub connection: Arc<ConnectionHandle>,
    pub writer: JoinHandle<()>,
    pub reader: JoinHandle<()>,
}

impl ConnectionTasks {
    /// Wait for both pumps to exit.
    pub async fn join(self) {
        let (writer, reader) = tokio::join!(self.writer, self.reader);
        for result in [writer, reader] {
            if let Err(e) = result {
                warn!(conn_id = %self.connection.id(), error = %e, "pump task failed");
            }
        }
    }
}

pub(crate) fn spawn<W, R, E>(
    hub: HubHandle,
    conn: Arc<ConnectionHandle>,
    rx: mpsc::Receiver<Arc<String>>,
    sink: W,
    stream: R,
    heartbeat: HeartbeatConfig,
) -> ConnectionTasks
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let writer = tokio::spawn(write_pump(hub.clone(), conn.clone(), rx, sink, heartbeat));
    let reader = tokio::spawn(read_pump(hub, conn.clone(), stream));
    ConnectionTasks {
        connection: conn,
        writer,
        reader,
    }
}

/// How long a retired connection waits for its close frame to go out.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Queue → wire, plus keepalive pings.
pub async fn write_pump<W>(
    hub: HubHandle,
    conn: Arc<ConnectionHandle>,
    mut rx: mpsc::Receiver<Arc<String>>,
    mut sink: W,
    heartbeat: HeartbeatConfig,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ticker = heartbeat.ticker();

    let reason = loop {
        let frame = tokio::select! {
            biased;
            () = conn.retired() => break "retired",
            next = rx.recv() => {
                let Some(text) = next else { break "queue closed" };
                Message::Text(text.as_str().into())
            }
            _ = ticker.tick() => {
                if peer_expired(&conn, heartbeat) {
                    break "pong timeout";
                }
                Message::Ping(Vec::new().into())
            }
        };
        if let Err(reason) = send_frame(&conn, &mut sink, &mut ticker, heartbeat, frame).await {
            break reason;
        }
    };

    if reason == "retired"
        && tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None)))
            .await
            .is_err()
    {
        debug!(conn_id = %conn.id(), "close frame not sent, peer not reading");
    }

    debug!(user_id = %conn.user_id(), conn_id = %conn.id(), reason, "write pump exited");
    hub.unregister(conn);
}

/// Write one frame. A stalled socket must not outlive retirement or the
/// pong timeout, so both are watched while the send is pending.
async fn send_frame<W>(
    conn: &ConnectionHandle,
    sink: &mut W,
    ticker: &mut Interval,
    heartbeat: HeartbeatConfig,
    frame: Message,
) -> Result<(), &'static str>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut send = sink.send(frame);
    loop {
        tokio::select! {
            biased;
            () = conn.retired() => return Err("retired"),
            sent = &mut send => {
                return sent.map_err(|e| {
                    debug!(conn_id = %conn.id(), error = %e, "write failed");
                    "write error"
                });
            }
            _ = ticker.tick() => {
                if peer_expired(conn, heartbeat) {
                    return Err("pong timeout");
                }
            }
        }
    }
}

fn peer_expired(conn: &ConnectionHandle, heartbeat: HeartbeatConfig) -> bool {
    if !conn.liveness().is_expired(heartbeat.pong_timeout) {
        return false;
    }
    warn!(
        user_id = %conn.user_id(),
        conn_id = %conn.id(),
        silent_ms = u64::try_from(conn.liveness().silent_for().as_millis()).unwrap_or(u64::MAX),
        "no pong within timeout, disconnecting"
    );
    true
}

/// Wire → decoded event → hub.
pub async fn read_pump<R, E>(hub: HubHandle, conn: Arc<ConnectionHandle>, mut stream: R)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let reason = loop {
        let frame = tokio::select! {
            biased;
            () = conn.retired() => break "retired",
            frame = stream.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    conn.liveness().mark_alive();
                    counter!(HUB_DECODE_ERRORS_TOTAL).increment(1);
                    debug!(conn_id = %conn.id(), len = data.len(), "dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                conn.liveness().mark_alive();
                continue;
            }
            Some(Ok(Message::Close(_))) => break "close frame",
            Some(Err(e)) => {
                debug!(conn_id = %conn.id(), error = %e, "read failed");
                break "read error";
            }
            None => break "end of stream",
        };
        conn.liveness().mark_alive();

        let mut event = match ChatEvent::from_json(&text) {
            Ok(event) => event,
            Err(e) => {
                counter!(HUB_DECODE_ERRORS_TOTAL).increment(1);
                debug!(conn_id = %conn.id(), error = %e, "dropping undecodable frame");
                continue;
            }
        };
        event.sender_id = conn.user_id();

        if hub.submit(event).await.is_err() {
            break "hub closed";
        }
    };

    info!(user_id = %conn.user_id(), conn_id = %conn.id(), reason, "read pump exited");
    hub.unregister(conn);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::channel::mpsc as fmpsc;
    use parley_core::events::EventKind;
    use parley_core::ids::UserId;

    use super::*;
    use crate::hub::handle::{channels, HubChannels};
    use crate::hub::HubConfig;

    type Inbound = Result<Message, std::io::Error>;

    fn hub() -> (HubHandle, HubChannels) {
        channels(&HubConfig::default())
    }

    fn heartbeat(interval: u64, timeout: u64) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_secs(interval),
            pong_timeout: Duration::from_secs(timeout),
        }
    }

    fn text(s: &str) -> Message {
        Message::Text(s.to_string().into())
    }

    // ── write pump ──────────────────────────────────────────────────

    #[tokio::test]
    async fn writes_queue_in_order() {
        let (hub, _channels) = hub();
        let (conn, rx) = ConnectionHandle::new(UserId::new(1), 8);
        let (sink, mut wire) = fmpsc::unbounded::<Message>();
        let task = tokio::spawn(write_pump(hub, conn.clone(), rx, sink, heartbeat(60, 120)));

        conn.try_send(Arc::new("one".into())).unwrap();
        conn.try_send(Arc::new("two".into())).unwrap();
        assert_eq!(wire.next().await, Some(text("one")));
        assert_eq!(wire.next().await, Some(text("two")));

        let _ = conn.retire();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn retirement_sends_close_and_unregisters() {
        let (hub, mut channels) = hub();
        let (conn, rx) = ConnectionHandle::new(UserId::new(1), 8);
        let (sink, mut wire) = fmpsc::unbounded::<Message>();
        let task = tokio::spawn(write_pump(hub, conn.clone(), rx, sink, heartbeat(60, 120)));

        let _ = conn.retire();
        task.await.unwrap();
        assert!(matches!(wire.next().await, Some(Message::Close(None))));
        let unregistered = channels.unregister_rx.recv().await.unwrap();
        assert_eq!(unregistered.id(), conn.id());
    }

    #[tokio::test(start_paused = true)]
    async fn pings_on_interval() {
        let (hub, _channels) = hub();
        let (conn, rx) = ConnectionHandle::new(UserId::new(1), 8);
        let (sink, mut wire) = fmpsc::unbounded::<Message>();
        let task = tokio::spawn(write_pump(hub, conn.clone(), rx, sink, heartbeat(5, 60)));

        assert!(matches!(wire.next().await, Some(Message::Ping(_))));
        let _ = conn.retire();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (hub, mut channels) = hub();
        let (conn, rx) = ConnectionHandle::new(UserId::new(1), 8);
        let (sink, _wire) = fmpsc::unbounded::<Message>();

        write_pump(hub, conn.clone(), rx, sink, heartbeat(5, 12)).await;

        assert!(conn.is_retired());
        assert_eq!(channels.unregister_rx.recv().await.unwrap().id(), conn.id());
    }

    #[tokio::test(start_paused = true)]
    async fn responsive_peer_stays_connected() {
        let (hub, _channels) = hub();
        let (conn, rx) = ConnectionHandle::new(UserId::new(1), 8);
        let (sink, mut wire) = fmpsc::unbounded::<Message>();
        let task = tokio::spawn(write_pump(hub, conn.clone(), rx, sink, heartbeat(5, 12)));

        for _ in 0..6 {
            assert!(matches!(wire.next().await, Some(Message::Ping(_))));
            conn.liveness().mark_alive();
        }
        assert!(!conn.is_retired());
        let _ = conn.retire();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn write_error_ends_pump() {
        let (hub, mut channels) = hub();
        let (conn, rx) = ConnectionHandle::new(UserId::new(1), 8);
        let (sink, wire) = fmpsc::unbounded::<Message>();
        drop(wire);

        let task = tokio::spawn(write_pump(hub, conn.clone(), rx, sink, heartbeat(60, 120)));
        conn.try_send(Arc::new("lost".into())).unwrap();
        task.await.unwrap();

        assert!(conn.is_retired());
        assert_eq!(channels.unregister_rx.recv().await.unwrap().id(), conn.id());
    }

    #[tokio::test(start_paused = true)]
    async fn retirement_stops_writer_blocked_on_stalled_socket() {
        let (hub, mut channels) = hub();
        let (conn, rx) = ConnectionHandle::new(UserId::new(1), 8);
        // Zero-buffer sink that is never drained: the second send blocks.
        let (sink, _wire) = fmpsc::channel::<Message>(0);
        for i in 0..4 {
            conn.try_send(Arc::new(format!("frame {i}"))).unwrap();
        }
        let task = tokio::spawn(write_pump(hub, conn.clone(), rx, sink, heartbeat(30, 60)));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!task.is_finished());

        let _ = conn.retire();
        tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .expect("write pump still running after retirement")
            .unwrap();
        assert_eq!(channels.unregister_rx.recv().await.unwrap().id(), conn.id());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_socket_times_out_without_pongs() {
        let (hub, mut channels) = hub();
        let (conn, rx) = ConnectionHandle::new(UserId::new(1), 8);
        let (sink, _wire) = fmpsc::channel::<Message>(0);
        conn.try_send(Arc::new("one".into())).unwrap();
        conn.try_send(Arc::new("two".into())).unwrap();

        tokio::time::timeout(
            Duration::from_secs(30),
            write_pump(hub, conn.clone(), rx, sink, heartbeat(5, 12)),
        )
        .await
        .expect("write pump ignored the pong timeout while blocked");

        assert!(conn.is_retired());
        assert_eq!(channels.unregister_rx.recv().await.unwrap().id(), conn.id());
    }

    // ── read pump ───────────────────────────────────────────────────

    #[tokio::test]
    async fn sender_id_is_overwritten() {
        let (hub, mut channels) = hub();
        let (conn, _rx) = ConnectionHandle::new(UserId::new(7), 8);
        let (wire, stream) = fmpsc::unbounded::<Inbound>();
        let task = tokio::spawn(read_pump(hub, conn.clone(), stream));

        wire.unbounded_send(Ok(text(
            r#"{"type":"message_send","sender_id":999,"receiver_id":2,"content":"hi"}"#,
        )))
        .unwrap();

        let event = channels.events_rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::MessageSend);
        assert_eq!(event.sender_id, UserId::new(7));
        assert_eq!(event.receiver_id, Some(UserId::new(2)));

        drop(wire);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn bad_frames_are_skipped() {
        let (hub, mut channels) = hub();
        let (conn, _rx) = ConnectionHandle::new(UserId::new(7), 8);
        let (wire, stream) = fmpsc::unbounded::<Inbound>();
        let task = tokio::spawn(read_pump(hub, conn.clone(), stream));

        wire.unbounded_send(Ok(text("not json"))).unwrap();
        wire.unbounded_send(Ok(text(r#"{"content":"no type"}"#))).unwrap();
        wire.unbounded_send(Ok(Message::Binary(vec![0xff, 0xfe].into()))).unwrap();
        wire.unbounded_send(Ok(Message::Binary(
            br#"{"type":"message_send","receiver_id":3,"content":"bin"}"#.to_vec().into(),
        )))
        .unwrap();

        let event = channels.events_rx.recv().await.unwrap();
        assert_eq!(event.content, "bin");
        assert!(!conn.is_retired());

        drop(wire);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn close_frame_unregisters() {
        let (hub, mut channels) = hub();
        let (conn, _rx) = ConnectionHandle::new(UserId::new(7), 8);
        let (wire, stream) = fmpsc::unbounded::<Inbound>();
        let task = tokio::spawn(read_pump(hub, conn.clone(), stream));

        wire.unbounded_send(Ok(Message::Close(None))).unwrap();
        task.await.unwrap();

        assert!(conn.is_retired());
        assert_eq!(channels.unregister_rx.recv().await.unwrap().id(), conn.id());
    }

    #[tokio::test]
    async fn transport_error_unregisters() {
        let (hub, mut channels) = hub();
        let (conn, _rx) = ConnectionHandle::new(UserId::new(7), 8);
        let (wire, stream) = fmpsc::unbounded::<Inbound>();
        let task = tokio::spawn(read_pump(hub, conn.clone(), stream));

        wire.unbounded_send(Err(std::io::Error::other("reset"))).unwrap();
        task.await.unwrap();

        assert!(conn.is_retired());
        assert_eq!(channels.unregister_rx.recv().await.unwrap().id(), conn.id());
    }

    #[tokio::test]
    async fn retirement_stops_reader() {
        let (hub, _channels) = hub();
        let (conn, _rx) = ConnectionHandle::new(UserId::new(7), 8);
        let (_wire, stream) = fmpsc::unbounded::<Inbound>();
        let task = tokio::spawn(read_pump(hub, conn.clone(), stream));

        let _ = conn.retire();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pong_marks_alive() {
        let (hub, _channels) = hub();
        let (conn, _rx) = ConnectionHandle::new(UserId::new(7), 8);
        let (wire, stream) = fmpsc::unbounded::<Inbound>();
        let task = tokio::spawn(read_pump(hub, conn.clone(), stream));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(conn.liveness().silent_for() >= Duration::from_secs(30));
        wire.unbounded_send(Ok(Message::Pong(Vec::new().into()))).unwrap();
        drop(wire);
        task.await.unwrap();
        assert!(conn.liveness().silent_for() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn stopped_hub_ends_reader() {
        let (hub, channels) = hub();
        drop(channels);
        let (conn, _rx) = ConnectionHandle::new(UserId::new(7), 8);
        let (wire, stream) = fmpsc::unbounded::<Inbound>();
        let task = tokio::spawn(read_pump(hub, conn.clone(), stream));

        wire.unbounded_send(Ok(text(r#"{"type":"message_send","receiver_id":2,"content":"x"}"#)))
            .unwrap();
        task.await.unwrap();
        assert!(conn.is_retired());
    }
}
