//! # ringline-core
//!
//! Wire types shared by the ringline relay server and the agent-side
//! correlation client:
//!
//! - [`Envelope`] / [`MessageBody`] — the closed tagged union carried over
//!   every WebSocket connection (`{ type, payload, timestamp }`)
//! - [`CallId`] — the correlation id matching asynchronous request/response
//!   pairs across two independent connections
//! - [`CallRequest`] / [`CallResponse`] / [`CallResult`] — one
//!   initiate → respond round trip
//!
//! Everything here serializes with camelCase field names to match the
//! browser-facing protocol.

pub mod call;
pub mod envelope;
pub mod ids;

pub use call::{CallRequest, CallResponse, CallResult, CallStatus, Urgency};
pub use envelope::{
    CallRef, CallText, Envelope, IncomingCallPayload, MessageBody, RegisterPayload, now_ms,
};
pub use ids::CallId;

/// Reserved `userId` that assigns the agent role on `register`.
///
/// Any other (or absent) `userId` registers the connection as an operator.
pub const AGENT_SENTINEL: &str = "agent";
