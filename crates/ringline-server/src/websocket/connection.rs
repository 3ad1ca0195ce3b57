//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ringline_core::Envelope;
use tokio::sync::mpsc;

/// A connected WebSocket client.
///
/// Holds the send half of the per-connection write task. Role is not a
/// property of the connection itself — classification happens in the
/// session registry when a `register` message arrives.
pub struct ClientConnection {
    /// Unique connection id.
    pub id: String,
    /// Send channel to the connection's write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// When the last heartbeat was received.
    last_heartbeat: Mutex<Instant>,
    /// Messages dropped because the channel was full or closed.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection around a write-task sender.
    pub fn new(id: String, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            last_heartbeat: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Send pre-serialized text to the client.
    ///
    /// Returns `false` (and counts a drop) if the channel is full or the
    /// write task is gone. Callers treat a failed send as a silent skip.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize an envelope and send it.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match serde_json::to_string(envelope) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Whether the write task is still accepting messages.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Record a heartbeat from this client.
    pub fn touch_heartbeat(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    /// Time since the last heartbeat (or connection establishment).
    ///
    /// Exposed for diagnostics only — the server never evicts a connection
    /// for a stale heartbeat; liveness detection is the client's concern.
    pub fn heartbeat_elapsed(&self) -> Duration {
        self.last_heartbeat.lock().elapsed()
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringline_core::MessageBody;

    fn make_connection() -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        (ClientConnection::new("conn_1".into(), tx), rx)
    }

    #[tokio::test]
    async fn send_delivers_to_channel() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send(Arc::new("hello".into())));
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn send_to_closed_channel_counts_drop() {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new("conn_2".into(), tx);
        drop(rx);
        assert!(!conn.send(Arc::new("hello".into())));
        assert_eq!(conn.drop_count(), 1);
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn send_to_full_channel_counts_drop() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new("conn_3".into(), tx);
        assert!(conn.send(Arc::new("msg1".into())));
        assert!(!conn.send(Arc::new("msg2".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_envelope_serializes_json() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send_envelope(&Envelope::new(MessageBody::Heartbeat {})));
        let msg = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["type"], "heartbeat");
    }

    #[test]
    fn heartbeat_touch_resets_elapsed() {
        let (conn, _rx) = make_connection();
        std::thread::sleep(Duration::from_millis(10));
        assert!(conn.heartbeat_elapsed() >= Duration::from_millis(10));
        conn.touch_heartbeat();
        assert!(conn.heartbeat_elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn new_connection_is_open() {
        let (conn, _rx) = make_connection();
        assert!(conn.is_open());
        assert_eq!(conn.id, "conn_1");
        assert_eq!(conn.drop_count(), 0);
    }
}
