//! Inbound message dispatch.

use std::sync::Arc;

use ringline_core::{Envelope, MessageBody};
use tracing::{debug, warn};

use crate::coordinator::CallCoordinator;
use crate::websocket::connection::ClientConnection;

/// Parse one text frame and route it to the coordinator.
///
/// A malformed envelope is logged and dropped; the connection stays open.
/// Server-to-client message types arriving inbound are ignored the same
/// way.
pub fn handle_message(
    coordinator: &Arc<CallCoordinator>,
    conn: &Arc<ClientConnection>,
    text: &str,
) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!(conn_id = %conn.id, %error, "dropping unparseable message");
            return;
        }
    };

    match envelope.body {
        MessageBody::Register(payload) => {
            let role = coordinator.register_client(Arc::clone(conn), payload.user_id);
            debug!(conn_id = %conn.id, ?role, "client registered");
        }
        MessageBody::InitiateCall(request) => coordinator.initiate_call(request),
        MessageBody::CallAccepted(call) => coordinator.accept_call(&call.call_id),
        MessageBody::CallRejected(call) => coordinator.reject_call(&call.call_id),
        MessageBody::UserResponse(response) => coordinator.handle_user_response(response),
        MessageBody::SendMessage(text) => {
            coordinator.send_follow_up(&text.call_id, text.message);
        }
        MessageBody::Heartbeat {} => {
            coordinator.heartbeat(&conn.id);
            let _ = conn.send_envelope(&Envelope::new(MessageBody::Heartbeat {}));
        }
        MessageBody::IncomingCall(_) | MessageBody::CallStatus(_) | MessageBody::TtsMessage(_) => {
            warn!(conn_id = %conn.id, "ignoring server-to-client message type from client");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringline_core::{CallStatus, now_ms};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn make_coordinator() -> Arc<CallCoordinator> {
        Arc::new(CallCoordinator::new(
            Duration::from_secs(60),
            Duration::from_secs(3600),
            None,
        ))
    }

    fn make_conn(id: &str) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        (Arc::new(ClientConnection::new(id.into(), tx)), rx)
    }

    fn next_body(rx: &mut mpsc::Receiver<Arc<String>>) -> MessageBody {
        let json = rx.try_recv().expect("expected a message");
        serde_json::from_str::<Envelope>(&json).unwrap().body
    }

    #[tokio::test]
    async fn heartbeat_is_echoed() {
        let coordinator = make_coordinator();
        let (conn, mut rx) = make_conn("c1");
        handle_message(
            &coordinator,
            &conn,
            r#"{"type":"heartbeat","payload":{},"timestamp":1}"#,
        );
        assert!(matches!(next_body(&mut rx), MessageBody::Heartbeat {}));
    }

    #[tokio::test]
    async fn malformed_message_is_dropped() {
        let coordinator = make_coordinator();
        let (conn, mut rx) = make_conn("c1");
        handle_message(&coordinator, &conn, "not json");
        handle_message(
            &coordinator,
            &conn,
            r#"{"type":"call_ended","payload":{},"timestamp":1}"#,
        );
        handle_message(
            &coordinator,
            &conn,
            r#"{"type":"initiate_call","payload":{"bogus":true},"timestamp":1}"#,
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn server_to_client_types_inbound_are_ignored() {
        let coordinator = make_coordinator();
        let (conn, mut rx) = make_conn("c1");
        handle_message(
            &coordinator,
            &conn,
            r#"{"type":"incoming_call","payload":{"callId":"c1","message":"x","urgency":"normal"},"timestamp":1}"#,
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(coordinator.stats().active_calls, 0);
    }

    #[tokio::test]
    async fn full_call_flow_through_dispatch() {
        let coordinator = make_coordinator();
        let (agent_conn, mut agent_rx) = make_conn("a1");
        let (op_conn, mut op_rx) = make_conn("o1");

        handle_message(
            &coordinator,
            &agent_conn,
            r#"{"type":"register","payload":{"userId":"agent"},"timestamp":1}"#,
        );
        handle_message(
            &coordinator,
            &op_conn,
            r#"{"type":"register","payload":{"userId":"browser-1"},"timestamp":1}"#,
        );
        assert!(coordinator.stats().agent_connected);

        let initiate = serde_json::json!({
            "type": "initiate_call",
            "payload": {
                "callId": "c1",
                "message": "need a decision",
                "urgency": "normal",
                "requiresResponse": true,
                "timestamp": now_ms(),
            },
            "timestamp": now_ms(),
        });
        handle_message(&coordinator, &agent_conn, &initiate.to_string());

        let MessageBody::IncomingCall(payload) = next_body(&mut op_rx) else {
            panic!("expected incoming_call");
        };
        assert_eq!(payload.call_id.as_str(), "c1");

        handle_message(
            &coordinator,
            &op_conn,
            r#"{"type":"call_accepted","payload":{"callId":"c1"},"timestamp":1}"#,
        );
        let MessageBody::CallStatus(result) = next_body(&mut agent_rx) else {
            panic!("expected call_status");
        };
        assert_eq!(result.status, CallStatus::Connected);

        let respond = serde_json::json!({
            "type": "user_response",
            "payload": { "callId": "c1", "userMessage": "ship it", "timestamp": now_ms() },
            "timestamp": now_ms(),
        });
        handle_message(&coordinator, &op_conn, &respond.to_string());

        let MessageBody::UserResponse(response) = next_body(&mut agent_rx) else {
            panic!("user_response arrives before the completed status");
        };
        assert_eq!(response.user_message, "ship it");
        let MessageBody::CallStatus(result) = next_body(&mut agent_rx) else {
            panic!("expected call_status");
        };
        assert_eq!(result.status, CallStatus::Completed);
    }
}
