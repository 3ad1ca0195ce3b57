//! Call orchestration.
//!
//! The coordinator owns the session registry and the call store behind one
//! mutex, so every lifecycle event — connection open/close, initiate,
//! accept, reject, respond, timer fire — mutates shared state from a
//! single serialized context. Routing is role-based, never per-connection:
//! agent-bound messages target whichever agent connection is current, and
//! operator broadcasts target all operator connections at send time. A
//! call therefore survives any individual operator disconnect.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use ringline_core::{
    AGENT_SENTINEL, CallId, CallRequest, CallResponse, CallResult, CallStatus, CallText, Envelope,
    IncomingCallPayload, MessageBody,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::calls::{Call, CallStore};
use crate::push::{PushNotification, WakeChannel};
use crate::registry::{Role, SessionRegistry};
use crate::websocket::connection::ClientConnection;

/// Counters exposed on the status endpoints.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    /// Calls tracked (any status, within the retention window).
    pub active_calls: usize,
    /// Operator connections currently registered.
    pub connected_users: usize,
    /// Whether an agent connection is present and open.
    pub agent_connected: bool,
}

struct CoordinatorState {
    registry: SessionRegistry,
    calls: CallStore,
}

/// Orchestrates the call lifecycle between the agent connection and the
/// operator connections.
///
/// Explicitly constructed and injected — one instance per server, no
/// process-wide state.
pub struct CallCoordinator {
    state: Mutex<CoordinatorState>,
    wake: Option<Arc<dyn WakeChannel>>,
    ring_timeout: Duration,
    retention: Duration,
}

impl CallCoordinator {
    /// Create a coordinator.
    ///
    /// `wake` is the optional out-of-band push channel used to rouse
    /// operator clients that have no live connection.
    #[must_use]
    pub fn new(
        ring_timeout: Duration,
        retention: Duration,
        wake: Option<Arc<dyn WakeChannel>>,
    ) -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                registry: SessionRegistry::new(),
                calls: CallStore::new(),
            }),
            wake,
            ring_timeout,
            retention,
        }
    }

    /// Classify and record a connection from its `register` payload.
    ///
    /// A late-joining operator is immediately told about every call that is
    /// still ringing, so it sees the alert without a re-broadcast.
    pub fn register_client(
        &self,
        conn: Arc<ClientConnection>,
        user_id: Option<String>,
    ) -> Role {
        let role = if user_id.as_deref() == Some(AGENT_SENTINEL) {
            Role::Agent
        } else {
            Role::Operator
        };

        let state = &mut *self.state.lock();
        match role {
            Role::Agent => state.registry.register(conn, Role::Agent, None),
            Role::Operator => {
                for call in state.calls.ringing() {
                    let _ = conn.send_envelope(&incoming_call_envelope(call));
                }
                state.registry.register(conn, Role::Operator, user_id);
            }
        }
        role
    }

    /// Clear a connection on transport close or error.
    ///
    /// In-flight calls are untouched: routing is role-based, so a ringing
    /// call can still be answered by any remaining operator connection.
    pub fn remove_client(&self, conn_id: &str) {
        let _ = self.state.lock().registry.remove(conn_id);
    }

    /// Record a heartbeat from a connection.
    pub fn heartbeat(&self, conn_id: &str) {
        self.state.lock().registry.touch_heartbeat(conn_id);
    }

    /// Start a call: track it, announce it to every operator connection,
    /// fire the push wake-up, and arm the ring timer.
    ///
    /// With zero operator connections and no push subscription to fall back
    /// on, the call fails immediately. With a push subscription armed, the
    /// call still rings — push is a parallel best-effort channel, not a
    /// gate.
    pub fn initiate_call(self: &Arc<Self>, request: CallRequest) {
        counter!("relay_calls_initiated_total").increment(1);
        let call_id = request.call_id.clone();
        info!(call_id = %call_id, urgency = ?request.urgency, "initiating call");

        let notification = PushNotification::incoming_call(&request);
        let ring_token = {
            let state = &mut *self.state.lock();
            let _ = state.calls.prune_terminal(retention_ms(self.retention));
            state.calls.insert(Call::new(request));

            let wake_armed = self.wake.as_ref().is_some_and(|w| w.is_armed());
            if state.registry.operator_count() == 0 && !wake_armed {
                warn!(call_id = %call_id, "no operator clients connected");
                finish_call(
                    state,
                    &call_id,
                    CallStatus::Failed,
                    Some("no operator clients connected".into()),
                );
                return;
            }

            let Some(call) = state.calls.get_mut(&call_id) else {
                return;
            };
            call.ring();
            let token = call.ring_timer_token();
            let envelope = incoming_call_envelope(call);
            broadcast_to_operators(&state.registry, &envelope);
            token
        };

        if let Some(ref wake) = self.wake {
            wake.notify(notification);
        }

        let coordinator = Arc::clone(self);
        let timeout = self.ring_timeout;
        drop(tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(timeout) => coordinator.ring_timer_fired(&call_id),
                () = ring_token.cancelled() => {}
            }
        }));
    }

    /// Operator accepted the call: ringing → connected.
    ///
    /// Anything else — unknown id, already connected, already terminal — is
    /// a logged no-op with no message sent.
    pub fn accept_call(&self, call_id: &CallId) {
        let state = &mut *self.state.lock();
        let Some(call) = state.calls.get_mut(call_id) else {
            warn!(call_id = %call_id, "accept for unknown call");
            return;
        };
        if call.status() != CallStatus::Ringing {
            warn!(call_id = %call_id, status = ?call.status(), "accept ignored, call not ringing");
            return;
        }
        call.connect();
        info!(call_id = %call_id, "call accepted");
        send_to_agent(
            &state.registry,
            &Envelope::new(MessageBody::CallStatus(CallResult {
                call_id: call_id.clone(),
                status: CallStatus::Connected,
                error: None,
                duration: None,
                user_response: None,
            })),
        );
    }

    /// Operator rejected the call: ringing → failed.
    pub fn reject_call(&self, call_id: &CallId) {
        let state = &mut *self.state.lock();
        let Some(call) = state.calls.get(call_id) else {
            warn!(call_id = %call_id, "reject for unknown call");
            return;
        };
        if call.status() != CallStatus::Ringing {
            warn!(call_id = %call_id, status = ?call.status(), "reject ignored, call not ringing");
            return;
        }
        info!(call_id = %call_id, "call rejected");
        finish_call(
            state,
            call_id,
            CallStatus::Failed,
            Some("rejected by operator".into()),
        );
    }

    /// Operator responded: record the text, forward it to the agent, then
    /// complete the call.
    ///
    /// The agent connection always sees `user_response` before
    /// `call_status(completed)` — consumers subscribing to both can rely on
    /// that order. Terminal calls are immutable, so a straggling response
    /// after completion or timeout is a logged no-op.
    pub fn handle_user_response(&self, response: CallResponse) {
        let state = &mut *self.state.lock();
        let call_id = response.call_id.clone();
        let Some(call) = state.calls.get_mut(&call_id) else {
            warn!(call_id = %call_id, "response for unknown call");
            return;
        };
        if call.is_terminal() {
            warn!(call_id = %call_id, status = ?call.status(), "response ignored, call already terminal");
            return;
        }
        info!(call_id = %call_id, "operator responded");
        call.set_user_response(response.user_message.clone());

        // Response first, completed status second. Fixed order.
        send_to_agent(
            &state.registry,
            &Envelope::new(MessageBody::UserResponse(response)),
        );
        finish_call(state, &call_id, CallStatus::Completed, None);
    }

    /// Broadcast follow-up text to every operator connection while the call
    /// is connected. No-op otherwise.
    pub fn send_follow_up(&self, call_id: &CallId, message: String) {
        let notification = {
            let state = &mut *self.state.lock();
            let Some(call) = state.calls.get(call_id) else {
                warn!(call_id = %call_id, "follow-up for unknown call");
                return;
            };
            if call.status() != CallStatus::Connected {
                warn!(call_id = %call_id, status = ?call.status(), "follow-up ignored, call not connected");
                return;
            }
            let envelope = Envelope::new(MessageBody::TtsMessage(CallText {
                call_id: call_id.clone(),
                message: message.clone(),
            }));
            broadcast_to_operators(&state.registry, &envelope);
            PushNotification::follow_up(call_id, &message)
        };

        if let Some(ref wake) = self.wake {
            wake.notify(notification);
        }
    }

    /// Current counters for the status endpoints.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        let state = self.state.lock();
        RelayStats {
            active_calls: state.calls.len(),
            connected_users: state.registry.operator_count(),
            agent_connected: state.registry.agent_connected(),
        }
    }

    /// Drop terminal calls older than the retention window.
    pub fn prune_expired(&self) {
        let _ = self
            .state
            .lock()
            .calls
            .prune_terminal(retention_ms(self.retention));
    }

    /// Ring timer fired. Only acts if the call is *still* ringing — a call
    /// that was accepted or rejected in the meantime must not be
    /// overwritten, even if the timer task lost the cancellation race.
    fn ring_timer_fired(&self, call_id: &CallId) {
        let state = &mut *self.state.lock();
        let Some(call) = state.calls.get(call_id) else {
            return;
        };
        if call.status() != CallStatus::Ringing {
            debug!(call_id = %call_id, status = ?call.status(), "ring timer fired after transition");
            return;
        }
        info!(call_id = %call_id, "call not answered");
        finish_call(state, call_id, CallStatus::NoAnswer, None);
    }
}

fn retention_ms(retention: Duration) -> i64 {
    i64::try_from(retention.as_millis()).unwrap_or(i64::MAX)
}

fn incoming_call_envelope(call: &Call) -> Envelope {
    Envelope::new(MessageBody::IncomingCall(IncomingCallPayload {
        call_id: call.request.call_id.clone(),
        message: call.request.message.clone(),
        urgency: call.request.urgency,
        context: call.request.context.clone(),
    }))
}

/// Move a call to a terminal status and report it to the agent connection.
///
/// Safe to call for an already-terminal call: the transition is refused and
/// no message is sent.
fn finish_call(
    state: &mut CoordinatorState,
    call_id: &CallId,
    status: CallStatus,
    error: Option<String>,
) {
    let Some(call) = state.calls.get_mut(call_id) else {
        return;
    };
    if !call.finish(status) {
        debug!(call_id = %call_id, "terminal transition refused, call already finished");
        return;
    }
    counter!("relay_calls_finished_total").increment(1);
    let result = CallResult {
        call_id: call_id.clone(),
        status,
        error,
        duration: call.duration(),
        user_response: call.user_response().map(ToOwned::to_owned),
    };
    send_to_agent(
        &state.registry,
        &Envelope::new(MessageBody::CallStatus(result)),
    );
}

/// Send to the current agent connection; silently skip if there is none or
/// its channel is closed.
fn send_to_agent(registry: &SessionRegistry, envelope: &Envelope) {
    match registry.agent() {
        Some(agent) if agent.is_open() => {
            if !agent.send_envelope(envelope) {
                counter!("relay_send_drops_total").increment(1);
                debug!(conn_id = %agent.id, "agent send dropped");
            }
        }
        Some(_) => debug!("agent channel closed, message skipped"),
        None => debug!("no agent connection, message skipped"),
    }
}

/// Serialize once and fan out to every operator connection.
fn broadcast_to_operators(registry: &SessionRegistry, envelope: &Envelope) {
    let json = match serde_json::to_string(envelope) {
        Ok(j) => Arc::new(j),
        Err(e) => {
            warn!(error = %e, "failed to serialize broadcast");
            return;
        }
    };
    let mut recipients = 0u32;
    for conn in registry.operators() {
        if conn.send(Arc::clone(&json)) {
            recipients += 1;
        } else {
            counter!("relay_send_drops_total").increment(1);
            debug!(conn_id = %conn.id, "operator send dropped");
        }
    }
    debug!(recipients, "broadcast to operators");
}
