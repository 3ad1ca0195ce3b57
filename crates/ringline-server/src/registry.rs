//! Live connections classified by role.
//!
//! At most one connection holds the agent role at any instant — a new
//! agent registration silently replaces the previous one (no rejection, no
//! queue, no handoff of in-flight calls beyond "future sends target
//! whichever connection is current"). Operators form an unbounded set.
//!
//! The registry is a plain struct with no interior locking: it is owned by
//! the coordinator and mutated only under the coordinator's single mutex,
//! together with the call store.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::websocket::connection::ClientConnection;

/// Role assigned to a connection at registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// The automated principal that initiates calls.
    Agent,
    /// A human-facing client that receives alerts and supplies responses.
    Operator,
}

struct OperatorEntry {
    conn: Arc<ClientConnection>,
    operator_id: Option<String>,
}

/// The set of live connections, keyed by connection id.
#[derive(Default)]
pub struct SessionRegistry {
    agent: Option<Arc<ClientConnection>>,
    operators: HashMap<String, OperatorEntry>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection under the given role.
    ///
    /// An agent registration replaces any prior agent connection; the
    /// replaced connection is not closed here — it stays open until its
    /// transport session ends.
    pub fn register(
        &mut self,
        conn: Arc<ClientConnection>,
        role: Role,
        operator_id: Option<String>,
    ) {
        match role {
            Role::Agent => {
                if let Some(ref previous) = self.agent {
                    info!(
                        previous = %previous.id,
                        replacement = %conn.id,
                        "agent connection replaced"
                    );
                }
                info!(conn_id = %conn.id, "agent registered");
                self.agent = Some(conn);
            }
            Role::Operator => {
                info!(
                    conn_id = %conn.id,
                    operator_id = operator_id.as_deref().unwrap_or("anonymous"),
                    "operator registered"
                );
                let _ = self.operators.insert(
                    conn.id.clone(),
                    OperatorEntry { conn, operator_id },
                );
            }
        }
    }

    /// Clear a connection from whichever set it belongs to.
    ///
    /// Returns the role it held, or `None` if it was never registered.
    pub fn remove(&mut self, conn_id: &str) -> Option<Role> {
        if self.agent.as_ref().is_some_and(|a| a.id == conn_id) {
            self.agent = None;
            info!(conn_id, "agent disconnected");
            return Some(Role::Agent);
        }
        if self.operators.remove(conn_id).is_some() {
            info!(conn_id, "operator disconnected");
            return Some(Role::Operator);
        }
        debug!(conn_id, "removed connection was not registered");
        None
    }

    /// The current agent connection, if one is registered.
    #[must_use]
    pub fn agent(&self) -> Option<&Arc<ClientConnection>> {
        self.agent.as_ref()
    }

    /// Whether an agent connection is present and its channel open.
    #[must_use]
    pub fn agent_connected(&self) -> bool {
        self.agent.as_ref().is_some_and(|a| a.is_open())
    }

    /// Iterate over all operator connections.
    pub fn operators(&self) -> impl Iterator<Item = &Arc<ClientConnection>> {
        self.operators.values().map(|e| &e.conn)
    }

    /// Number of operator connections.
    #[must_use]
    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    /// The opaque operator id supplied at registration, if any.
    #[must_use]
    pub fn operator_id(&self, conn_id: &str) -> Option<&str> {
        self.operators
            .get(conn_id)?
            .operator_id
            .as_deref()
    }

    /// Record a heartbeat on whichever connection sent it.
    pub fn touch_heartbeat(&mut self, conn_id: &str) {
        if let Some(ref agent) = self.agent {
            if agent.id == conn_id {
                agent.touch_heartbeat();
                return;
            }
        }
        if let Some(entry) = self.operators.get(conn_id) {
            entry.conn.touch_heartbeat();
        }
    }
}
