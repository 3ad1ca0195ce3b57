//! # ringline-client
//!
//! The agent side of ringline. [`CallerClient`] opens one WebSocket to the
//! relay, registers under the agent role, and correlates each outgoing
//! call with the status updates and operator responses that come back on
//! the same connection. Connections are lazy: nothing is dialed until the
//! first call, and a dropped connection is redialed with exponential
//! backoff on the next use.

pub mod backoff;
pub mod caller;
pub mod pending;

pub use caller::{CallerClient, ClientError};
