//! Per-call state and the in-memory call store.

use std::collections::HashMap;

use ringline_core::{CallId, CallRequest, CallStatus, now_ms};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One initiate → respond round trip.
///
/// Mutated only through the methods here so the state machine invariants
/// hold: a terminal call is immutable and `end_time` is set exactly once.
pub struct Call {
    /// The originating request.
    pub request: CallRequest,
    status: CallStatus,
    start_time: i64,
    connected_time: Option<i64>,
    end_time: Option<i64>,
    user_response: Option<String>,
    /// Cancels the armed ring timer on any transition out of `ringing`.
    ring_timer: CancellationToken,
}

impl Call {
    /// Create a call in `pending`.
    #[must_use]
    pub fn new(request: CallRequest) -> Self {
        Self {
            request,
            status: CallStatus::Pending,
            start_time: now_ms(),
            connected_time: None,
            end_time: None,
            user_response: None,
            ring_timer: CancellationToken::new(),
        }
    }

    /// Correlation id.
    #[must_use]
    pub fn id(&self) -> &CallId {
        &self.request.call_id
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> CallStatus {
        self.status
    }

    /// Whether the call has reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Epoch-ms creation time.
    #[must_use]
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    /// Epoch-ms time of the terminal transition, if reached.
    #[must_use]
    pub fn end_time(&self) -> Option<i64> {
        self.end_time
    }

    /// Epoch-ms time the call was accepted, if it was.
    #[must_use]
    pub fn connected_time(&self) -> Option<i64> {
        self.connected_time
    }

    /// The operator's response text, once recorded.
    #[must_use]
    pub fn user_response(&self) -> Option<&str> {
        self.user_response.as_deref()
    }

    /// Milliseconds from initiation to the terminal transition.
    #[must_use]
    pub fn duration(&self) -> Option<i64> {
        self.end_time.map(|end| end - self.start_time)
    }

    /// A token that fires when the ring timer should stand down.
    #[must_use]
    pub fn ring_timer_token(&self) -> CancellationToken {
        self.ring_timer.clone()
    }

    /// pending → ringing.
    pub fn ring(&mut self) {
        debug_assert_eq!(self.status, CallStatus::Pending);
        self.status = CallStatus::Ringing;
    }

    /// ringing → connected. Records the connect time and disarms the timer.
    pub fn connect(&mut self) {
        debug_assert_eq!(self.status, CallStatus::Ringing);
        self.status = CallStatus::Connected;
        self.connected_time = Some(now_ms());
        self.ring_timer.cancel();
    }

    /// Record the operator's response text.
    pub fn set_user_response(&mut self, text: String) {
        self.user_response = Some(text);
    }

    /// Transition to a terminal status, setting `end_time` exactly once and
    /// disarming any still-armed ring timer.
    ///
    /// Returns `false` (without mutating) if the call is already terminal.
    pub fn finish(&mut self, status: CallStatus) -> bool {
        debug_assert!(status.is_terminal());
        if self.is_terminal() {
            return false;
        }
        self.status = status;
        self.end_time = Some(now_ms());
        self.ring_timer.cancel();
        true
    }
}

/// In-memory map of all tracked calls.
///
/// Calls are never explicitly deleted by lifecycle events; terminal calls
/// age out after a bounded retention window instead.
#[derive(Default)]
pub struct CallStore {
    calls: HashMap<CallId, Call>,
}

impl CallStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new call. A duplicate id replaces the old entry — callers
    /// guarantee process-lifetime uniqueness.
    pub fn insert(&mut self, call: Call) {
        let _ = self.calls.insert(call.id().clone(), call);
    }

    /// Look up a call.
    #[must_use]
    pub fn get(&self, id: &CallId) -> Option<&Call> {
        self.calls.get(id)
    }

    /// Look up a call for mutation.
    pub fn get_mut(&mut self, id: &CallId) -> Option<&mut Call> {
        self.calls.get_mut(id)
    }

    /// Number of calls tracked (any status).
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Iterate over all calls currently in `ringing`.
    pub fn ringing(&self) -> impl Iterator<Item = &Call> {
        self.calls
            .values()
            .filter(|c| c.status() == CallStatus::Ringing)
    }

    /// Drop terminal calls whose `end_time` is older than `retention_ms`.
    ///
    /// Active calls are never pruned. Returns how many were removed.
    pub fn prune_terminal(&mut self, retention_ms: i64) -> usize {
        let cutoff = now_ms() - retention_ms;
        let before = self.calls.len();
        self.calls
            .retain(|_, call| !call.is_terminal() || call.end_time().is_none_or(|end| end >= cutoff));
        let removed = before - self.calls.len();
        if removed > 0 {
            debug!(removed, "pruned expired terminal calls");
        }
        removed
    }
}
