//! WebSocket transport.
//!
//! Each accepted socket is split into a write task fed by a bounded
//! channel and a read loop that dispatches inbound frames. The connection
//! is registered with the coordinator only when its `register` message
//! arrives; on any exit path the connection is removed and the write task
//! torn down.

pub mod connection;
pub mod handler;

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::coordinator::CallCoordinator;
use connection::ClientConnection;

/// Outbound frames buffered per connection before sends start dropping.
const SEND_BUFFER: usize = 64;

/// Drive one WebSocket session to completion.
pub async fn handle_socket(socket: WebSocket, coordinator: Arc<CallCoordinator>) {
    let conn_id = format!("conn_{}", Uuid::now_v7());
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(SEND_BUFFER);
    let conn = Arc::new(ClientConnection::new(conn_id.clone(), tx));
    debug!(conn_id = %conn_id, "websocket connected");

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(Message::Text(message.as_str().into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => handler::handle_message(&coordinator, &conn, text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_)) => {}
            Err(error) => {
                debug!(conn_id = %conn_id, %error, "websocket read error");
                break;
            }
        }
    }

    coordinator.remove_client(&conn_id);
    writer.abort();
    debug!(
        conn_id = %conn_id,
        dropped = conn.drop_count(),
        "websocket closed"
    );
}
