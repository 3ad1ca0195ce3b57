//! Call lifecycle types: status, urgency, request/response/result shapes.

use serde::{Deserialize, Serialize};

use crate::ids::CallId;

/// Lifecycle state of a call.
///
/// `pending → ringing → { connected → completed } | failed | no_answer`.
/// The three terminal states freeze the call; a terminal call is never
/// mutated again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Created, not yet announced to any operator.
    Pending,
    /// Announced to operator connections, waiting for accept/reject.
    Ringing,
    /// An operator accepted; the conversation is live.
    Connected,
    /// The operator responded; terminal.
    Completed,
    /// Rejected or undeliverable; terminal.
    Failed,
    /// The ring timer fired before anyone answered; terminal.
    NoAnswer,
}

impl CallStatus {
    /// Whether this status is terminal (completed, failed or `no_answer`).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::NoAnswer)
    }
}

/// Advisory priority annotation attached to a call.
///
/// Affects presentation on the operator side only, never routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    /// Can wait.
    Low,
    /// Default.
    Normal,
    /// Should be looked at soon.
    High,
    /// Wake someone up.
    Critical,
}

impl Default for Urgency {
    fn default() -> Self {
        Self::Normal
    }
}

/// A call initiation request from the agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    /// Caller-generated correlation id, unique per process lifetime.
    pub call_id: CallId,
    /// Text to convey to the operator.
    pub message: String,
    /// Advisory priority.
    #[serde(default)]
    pub urgency: Urgency,
    /// Optional free-text context shown alongside the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Whether the agent expects a textual reply.
    pub requires_response: bool,
    /// Client-side epoch-ms timestamp of the request.
    pub timestamp: i64,
}

/// A response from the operator during a connected call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResponse {
    /// Correlation id of the call being answered.
    pub call_id: CallId,
    /// The operator's (voice-derived or typed) text.
    pub user_message: String,
    /// Epoch-ms timestamp of the response.
    pub timestamp: i64,
}

/// Terminal (or transitional) outcome of a call, sent to the agent as
/// `call_status`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    /// Correlation id.
    pub call_id: CallId,
    /// Current status.
    pub status: CallStatus,
    /// Human-readable failure reason, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Milliseconds from initiation to the terminal transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    /// The operator's response text, when the call completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_response: Option<String>,
}
