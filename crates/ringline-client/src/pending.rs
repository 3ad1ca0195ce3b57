//! Correlation between outgoing calls and inbound relay messages.
//!
//! Each in-flight call has up to two sinks keyed by call id: a completion
//! sink resolved by the first *terminal* `call_status`, and a reply sink
//! resolved by `user_response`. A reply that lands before anyone is
//! waiting is buffered so the waiter still sees it; a duplicate terminal
//! status for an already-resolved call is dropped.

use std::collections::HashMap;

use parking_lot::Mutex;
use ringline_core::{CallId, CallResponse, CallResult, CallStatus};
use tokio::sync::oneshot;
use tracing::debug;

enum ReplySlot {
    Waiting(oneshot::Sender<CallResponse>),
    Arrived(CallResponse),
}

/// Either a buffered reply or a receiver to await.
pub enum ReplyWait {
    /// The reply already arrived.
    Ready(CallResponse),
    /// Still pending; await this receiver.
    Pending(oneshot::Receiver<CallResponse>),
}

#[derive(Default)]
struct Inner {
    completions: HashMap<CallId, oneshot::Sender<CallResult>>,
    replies: HashMap<CallId, ReplySlot>,
}

/// Thread-safe sink table shared between callers and the reader task.
#[derive(Default)]
pub struct PendingCalls {
    inner: Mutex<Inner>,
}

impl PendingCalls {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a completion waiter for a call.
    ///
    /// Last writer wins: a previous waiter for the same id is resolved
    /// with a failed result so it never hangs.
    pub fn register_completion(&self, call_id: &CallId) -> oneshot::Receiver<CallResult> {
        let (tx, rx) = oneshot::channel();
        let previous = self.inner.lock().completions.insert(call_id.clone(), tx);
        if let Some(old) = previous {
            debug!(call_id = %call_id, "completion waiter replaced");
            let _ = old.send(CallResult {
                call_id: call_id.clone(),
                status: CallStatus::Failed,
                error: Some("continuation replaced".into()),
                duration: None,
                user_response: None,
            });
        }
        rx
    }

    /// Resolve the completion waiter with a terminal result.
    ///
    /// Non-terminal statuses (`connected` progress updates) are ignored.
    /// Returns whether a waiter was resolved.
    pub fn complete(&self, result: CallResult) -> bool {
        if !result.status.is_terminal() {
            debug!(call_id = %result.call_id, status = ?result.status, "progress update, not a completion");
            return false;
        }
        let sender = self.inner.lock().completions.remove(&result.call_id);
        match sender {
            Some(tx) => tx.send(result).is_ok(),
            None => {
                debug!(call_id = %result.call_id, "terminal status for unknown or resolved call");
                false
            }
        }
    }

    /// Deliver an operator reply: hand it to a waiter if one is parked,
    /// otherwise buffer it for the next [`subscribe_reply`] call.
    ///
    /// [`subscribe_reply`]: Self::subscribe_reply
    pub fn reply(&self, response: CallResponse) {
        let mut inner = self.inner.lock();
        match inner.replies.remove(&response.call_id) {
            Some(ReplySlot::Waiting(tx)) => {
                let _ = tx.send(response);
            }
            _ => {
                let _ = inner
                    .replies
                    .insert(response.call_id.clone(), ReplySlot::Arrived(response));
            }
        }
    }

    /// Get the reply for a call, either buffered or as a future receiver.
    pub fn subscribe_reply(&self, call_id: &CallId) -> ReplyWait {
        let mut inner = self.inner.lock();
        if let Some(ReplySlot::Arrived(response)) = inner.replies.remove(call_id) {
            return ReplyWait::Ready(response);
        }
        let (tx, rx) = oneshot::channel();
        let _ = inner
            .replies
            .insert(call_id.clone(), ReplySlot::Waiting(tx));
        ReplyWait::Pending(rx)
    }

    /// Drop all state for a call. Used when the caller gives up waiting.
    pub fn remove(&self, call_id: &CallId) {
        let mut inner = self.inner.lock();
        let _ = inner.completions.remove(call_id);
        let _ = inner.replies.remove(call_id);
    }

    /// Fail every in-flight completion. Called when the connection drops;
    /// buffered replies are discarded too.
    pub fn fail_all(&self, error: &str) {
        let mut inner = self.inner.lock();
        for (call_id, tx) in inner.completions.drain() {
            let _ = tx.send(CallResult {
                call_id,
                status: CallStatus::Failed,
                error: Some(error.to_owned()),
                duration: None,
                user_response: None,
            });
        }
        inner.replies.clear();
    }

    /// Number of in-flight completion waiters.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.lock().completions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringline_core::now_ms;

    fn result(id: &str, status: CallStatus) -> CallResult {
        CallResult {
            call_id: CallId::from(id),
            status,
            error: None,
            duration: Some(10),
            user_response: None,
        }
    }

    fn response(id: &str, text: &str) -> CallResponse {
        CallResponse {
            call_id: CallId::from(id),
            user_message: text.into(),
            timestamp: now_ms(),
        }
    }

    #[tokio::test]
    async fn terminal_status_resolves_waiter() {
        let pending = PendingCalls::new();
        let rx = pending.register_completion(&CallId::from("c1"));
        assert!(pending.complete(result("c1", CallStatus::Completed)));
        assert_eq!(rx.await.unwrap().status, CallStatus::Completed);
        assert_eq!(pending.in_flight(), 0);
    }

    #[tokio::test]
    async fn connected_update_does_not_resolve() {
        let pending = PendingCalls::new();
        let mut rx = pending.register_completion(&CallId::from("c1"));
        assert!(!pending.complete(result("c1", CallStatus::Connected)));
        assert!(rx.try_recv().is_err());
        assert_eq!(pending.in_flight(), 1);
    }

    #[tokio::test]
    async fn duplicate_terminal_is_dropped() {
        let pending = PendingCalls::new();
        let rx = pending.register_completion(&CallId::from("c1"));
        assert!(pending.complete(result("c1", CallStatus::Completed)));
        assert!(!pending.complete(result("c1", CallStatus::Failed)));
        assert_eq!(rx.await.unwrap().status, CallStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_call_is_dropped() {
        let pending = PendingCalls::new();
        assert!(!pending.complete(result("ghost", CallStatus::Completed)));
    }

    #[tokio::test]
    async fn replaced_waiter_fails_with_reason() {
        let pending = PendingCalls::new();
        let old = pending.register_completion(&CallId::from("c1"));
        let new = pending.register_completion(&CallId::from("c1"));

        let old_result = old.await.unwrap();
        assert_eq!(old_result.status, CallStatus::Failed);
        assert_eq!(old_result.error.as_deref(), Some("continuation replaced"));

        assert!(pending.complete(result("c1", CallStatus::Completed)));
        assert_eq!(new.await.unwrap().status, CallStatus::Completed);
    }

    #[tokio::test]
    async fn reply_before_subscribe_is_buffered() {
        let pending = PendingCalls::new();
        pending.reply(response("c1", "yes"));
        match pending.subscribe_reply(&CallId::from("c1")) {
            ReplyWait::Ready(r) => assert_eq!(r.user_message, "yes"),
            ReplyWait::Pending(_) => panic!("reply should have been buffered"),
        }
    }

    #[tokio::test]
    async fn reply_after_subscribe_reaches_waiter() {
        let pending = PendingCalls::new();
        let ReplyWait::Pending(rx) = pending.subscribe_reply(&CallId::from("c1")) else {
            panic!("nothing buffered yet");
        };
        pending.reply(response("c1", "go ahead"));
        assert_eq!(rx.await.unwrap().user_message, "go ahead");
    }

    #[tokio::test]
    async fn fail_all_resolves_every_waiter() {
        let pending = PendingCalls::new();
        let rx1 = pending.register_completion(&CallId::from("c1"));
        let rx2 = pending.register_completion(&CallId::from("c2"));
        pending.fail_all("connection lost");

        for rx in [rx1, rx2] {
            let result = rx.await.unwrap();
            assert_eq!(result.status, CallStatus::Failed);
            assert_eq!(result.error.as_deref(), Some("connection lost"));
        }
        assert_eq!(pending.in_flight(), 0);
    }

    #[tokio::test]
    async fn remove_clears_both_sinks() {
        let pending = PendingCalls::new();
        let mut rx = pending.register_completion(&CallId::from("c1"));
        pending.reply(response("c1", "late"));
        pending.remove(&CallId::from("c1"));
        assert!(!pending.complete(result("c1", CallStatus::Completed)));
        assert!(rx.try_recv().is_err());
        assert!(matches!(
            pending.subscribe_reply(&CallId::from("c1")),
            ReplyWait::Pending(_)
        ));
    }
}
