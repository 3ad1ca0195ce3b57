//! Web Push wake-up channel.
//!
//! When no operator connection is live, the only way to reach the human is
//! an out-of-band push notification that wakes their browser's service
//! worker, which then opens a WebSocket connection back to the relay. The
//! coordinator talks to this channel through [`WakeChannel`] so the relay
//! runs unchanged with push unconfigured.

pub mod config;
pub mod service;
pub mod types;

pub use config::PushConfig;
pub use service::{PushError, PushService};
pub use types::{PushNotification, PushSubscription};

/// Out-of-band channel for rousing operator clients with no live
/// connection.
pub trait WakeChannel: Send + Sync {
    /// Whether a delivery target is currently registered.
    fn is_armed(&self) -> bool;

    /// Deliver a notification best-effort. Must not block the caller.
    fn notify(&self, notification: PushNotification);
}
