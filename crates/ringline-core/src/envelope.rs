//! The message envelope carried over every connection.
//!
//! Wire shape: `{ "type": <enum>, "payload": <map>, "timestamp": <epoch-ms> }`.
//! The body is a closed tagged union — one concrete payload shape per
//! variant, validated at the boundary before dispatch. Unknown types fail
//! deserialization and are dropped by the receiver (the connection stays
//! open).

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::call::{CallRequest, CallResponse, CallResult, Urgency};
use crate::ids::CallId;

/// Current time as integer epoch milliseconds, the wire timestamp unit.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// One message on a ringline connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Typed body (`type` + `payload` on the wire).
    #[serde(flatten)]
    pub body: MessageBody,
    /// Sender-side epoch-ms timestamp.
    pub timestamp: i64,
}

impl Envelope {
    /// Wrap a body with the current timestamp.
    #[must_use]
    pub fn new(body: MessageBody) -> Self {
        Self {
            body,
            timestamp: now_ms(),
        }
    }
}

/// Closed set of message types, discriminated by `type` with the variant
/// body under `payload`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MessageBody {
    /// Client → server: role registration. A `userId` equal to the agent
    /// sentinel assigns the agent role; anything else is an operator.
    Register(RegisterPayload),
    /// Agent → server: start a call.
    InitiateCall(CallRequest),
    /// Server → operator: a call is ringing.
    IncomingCall(IncomingCallPayload),
    /// Operator → server: call accepted.
    CallAccepted(CallRef),
    /// Operator → server: call rejected.
    CallRejected(CallRef),
    /// Server → agent: call status update (terminal or `connected`).
    CallStatus(CallResult),
    /// Operator → server → agent: the operator's textual response.
    UserResponse(CallResponse),
    /// Agent → server: follow-up text for a connected call.
    SendMessage(CallText),
    /// Server → operator: speak this text to the operator.
    TtsMessage(CallText),
    /// Either direction: liveness probe, echoed back by the receiver.
    Heartbeat {},
}

/// Payload of `register`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    /// Opaque client identity; the agent sentinel selects the agent role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Payload of `incoming_call`, fanned out to every operator connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCallPayload {
    /// Correlation id.
    pub call_id: CallId,
    /// Text to convey to the operator.
    pub message: String,
    /// Advisory priority.
    pub urgency: Urgency,
    /// Optional free-text context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// A payload referencing a call by id only (`call_accepted` / `call_rejected`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRef {
    /// Correlation id.
    pub call_id: CallId,
}

/// A text message scoped to a call (`send_message` / `tts_message`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallText {
    /// Correlation id.
    pub call_id: CallId,
    /// The text to deliver.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallStatus;

    fn parse(json: &str) -> Envelope {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn register_round_trip() {
        let env = Envelope::new(MessageBody::Register(RegisterPayload {
            user_id: Some("agent".into()),
        }));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "register");
        assert_eq!(json["payload"]["userId"], "agent");
        assert!(json["timestamp"].is_i64());
        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn register_without_user_id() {
        let env = parse(r#"{"type":"register","payload":{},"timestamp":1}"#);
        assert_eq!(
            env.body,
            MessageBody::Register(RegisterPayload { user_id: None })
        );
    }

    #[test]
    fn heartbeat_serializes_empty_payload() {
        let env = Envelope::new(MessageBody::Heartbeat {});
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "heartbeat");
        assert!(json["payload"].as_object().unwrap().is_empty());
    }

    #[test]
    fn heartbeat_parses() {
        let env = parse(r#"{"type":"heartbeat","payload":{},"timestamp":1700000000000}"#);
        assert_eq!(env.body, MessageBody::Heartbeat {});
        assert_eq!(env.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn initiate_call_parses_full_request() {
        let env = parse(
            r#"{
                "type": "initiate_call",
                "payload": {
                    "callId": "c1",
                    "message": "deploy now?",
                    "urgency": "critical",
                    "context": "prod release",
                    "requiresResponse": true,
                    "timestamp": 5
                },
                "timestamp": 6
            }"#,
        );
        let MessageBody::InitiateCall(req) = env.body else {
            panic!("expected initiate_call");
        };
        assert_eq!(req.call_id.as_str(), "c1");
        assert_eq!(req.urgency, Urgency::Critical);
        assert_eq!(req.context.as_deref(), Some("prod release"));
    }

    #[test]
    fn incoming_call_wire_shape() {
        let env = Envelope::new(MessageBody::IncomingCall(IncomingCallPayload {
            call_id: CallId::from("c1"),
            message: "ping".into(),
            urgency: Urgency::Low,
            context: None,
        }));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "incoming_call");
        assert_eq!(json["payload"]["callId"], "c1");
        assert_eq!(json["payload"]["urgency"], "low");
        assert!(json["payload"].get("context").is_none());
    }

    #[test]
    fn accepted_and_rejected_share_shape() {
        let a = parse(r#"{"type":"call_accepted","payload":{"callId":"c1"},"timestamp":1}"#);
        let r = parse(r#"{"type":"call_rejected","payload":{"callId":"c1"},"timestamp":1}"#);
        assert_eq!(
            a.body,
            MessageBody::CallAccepted(CallRef {
                call_id: CallId::from("c1")
            })
        );
        assert_eq!(
            r.body,
            MessageBody::CallRejected(CallRef {
                call_id: CallId::from("c1")
            })
        );
    }

    #[test]
    fn call_status_round_trip() {
        let env = Envelope::new(MessageBody::CallStatus(CallResult {
            call_id: CallId::from("c3"),
            status: CallStatus::NoAnswer,
            error: Some("ring timeout".into()),
            duration: Some(60_000),
            user_response: None,
        }));
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn user_response_wire_shape() {
        let env = parse(
            r#"{"type":"user_response","payload":{"callId":"c1","userMessage":"yes","timestamp":7},"timestamp":8}"#,
        );
        let MessageBody::UserResponse(resp) = env.body else {
            panic!("expected user_response");
        };
        assert_eq!(resp.user_message, "yes");
        assert_eq!(resp.timestamp, 7);
    }

    #[test]
    fn tts_and_send_message_shapes() {
        let send =
            parse(r#"{"type":"send_message","payload":{"callId":"c1","message":"hold on"},"timestamp":1}"#);
        assert!(matches!(send.body, MessageBody::SendMessage(_)));

        let tts = Envelope::new(MessageBody::TtsMessage(CallText {
            call_id: CallId::from("c1"),
            message: "hold on".into(),
        }));
        let json = serde_json::to_value(&tts).unwrap();
        assert_eq!(json["type"], "tts_message");
        assert_eq!(json["payload"]["message"], "hold on");
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let result: Result<Envelope, _> =
            serde_json::from_str(r#"{"type":"call_ended","payload":{},"timestamp":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn malformed_payload_fails_to_parse() {
        // user_response without its required userMessage field
        let result: Result<Envelope, _> =
            serde_json::from_str(r#"{"type":"user_response","payload":{"callId":"c1"},"timestamp":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn now_ms_is_plausible() {
        let ms = now_ms();
        // After 2020-01-01 and before 2100.
        assert!(ms > 1_577_836_800_000);
        assert!(ms < 4_102_444_800_000);
    }
}
