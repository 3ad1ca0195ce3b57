//! Push subscription and notification payloads.

use ringline_core::{CallId, CallRequest, Urgency};
use serde::{Deserialize, Serialize};

/// A browser push subscription, exactly as `PushManager.subscribe()`
/// serializes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    /// Push-service delivery URL for this browser.
    pub endpoint: String,
    /// Client keys; carried for completeness, unused by payload-less sends.
    pub keys: SubscriptionKeys,
}

/// Encryption keys accompanying a subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    /// Client ECDH public key.
    pub p256dh: String,
    /// Client auth secret.
    pub auth: String,
}

/// What to show the operator.
///
/// Deliveries are payload-less: the browser's service worker fetches call
/// details over the WebSocket after waking. `tag` collapses repeated
/// deliveries for the same call into one visible alert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushNotification {
    /// Notification title.
    pub title: String,
    /// Notification body text.
    pub body: String,
    /// Collapse key, the call id.
    pub tag: String,
}

impl PushNotification {
    /// Notification for a new incoming call.
    #[must_use]
    pub fn incoming_call(request: &CallRequest) -> Self {
        let title = match request.urgency {
            Urgency::High | Urgency::Critical => "Urgent call from agent",
            Urgency::Normal | Urgency::Low => "Incoming call from agent",
        };
        Self {
            title: title.into(),
            body: request.message.clone(),
            tag: request.call_id.as_str().to_owned(),
        }
    }

    /// Notification for follow-up text on a connected call.
    #[must_use]
    pub fn follow_up(call_id: &CallId, message: &str) -> Self {
        Self {
            title: "Agent sent an update".into(),
            body: message.to_owned(),
            tag: call_id.as_str().to_owned(),
        }
    }
}
