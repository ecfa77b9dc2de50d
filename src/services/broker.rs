//! Channel Broker: scope-keyed fan-out to live connections.
//!
//! ARCHITECTURE
//! ============
//! Each live connection owns a bounded `mpsc` queue. The broker indexes the
//! queue senders three ways:
//!
//! - `connections`: connection id → owner, role, subscribed scopes
//! - `scopes`: scope id → subscribed connection senders
//! - `users`: user id → that user's connection senders (for notifications)
//!
//! `publish` and `publish_to_user` only read their own index, so fan-out to
//! different scopes runs in parallel and never contends with unrelated
//! subscribe/unsubscribe traffic. Mutations always lock `connections` before
//! `scopes`/`users`, never the reverse.
//!
//! DELIVERY
//! ========
//! Delivery is best-effort: `try_send` into the connection queue, dropping
//! the event if the queue is full. A closed queue means the connection is
//! gone; it is pruned after the publish pass. Callers publish under the
//! scope's lock, so a connection sees one scope's events in publish order.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{ComplaintStatus, Role, User};
use crate::error::CoreError;
use crate::frame::Frame;
use crate::services::access;
use crate::state::AppState;
use crate::store::{ComplaintFilter, RequestFilter};

// =============================================================================
// TYPES
// =============================================================================

struct Connection {
    user_id: Uuid,
    role: Role,
    tx: mpsc::Sender<Frame>,
    scopes: HashSet<Uuid>,
}

/// Receiving half of a live connection, handed to the transport.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: Uuid,
    pub events: mpsc::Receiver<Frame>,
    /// Scopes subscribed at connect time.
    pub scopes: Vec<Uuid>,
}

pub struct ChannelBroker {
    queue_capacity: usize,
    connections: DashMap<Uuid, Connection>,
    scopes: DashMap<Uuid, HashMap<Uuid, mpsc::Sender<Frame>>>,
    users: DashMap<Uuid, HashMap<Uuid, mpsc::Sender<Frame>>>,
}

// =============================================================================
// BROKER
// =============================================================================

impl ChannelBroker {
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue_capacity: queue_capacity.max(1),
            connections: DashMap::new(),
            scopes: DashMap::new(),
            users: DashMap::new(),
        }
    }

    /// Register a connection with no subscriptions.
    pub fn register(&self, user_id: Uuid, role: Role) -> (Uuid, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let conn_id = Uuid::new_v4();
        self.users.entry(user_id).or_default().insert(conn_id, tx.clone());
        self.connections
            .insert(conn_id, Connection { user_id, role, tx, scopes: HashSet::new() });
        (conn_id, rx)
    }

    /// Subscribe without an access check. Returns false for unknown connections.
    pub fn attach(&self, conn_id: Uuid, scope_id: Uuid) -> bool {
        let Some(mut conn) = self.connections.get_mut(&conn_id) else {
            return false;
        };
        if conn.scopes.insert(scope_id) {
            self.scopes.entry(scope_id).or_default().insert(conn_id, conn.tx.clone());
        }
        true
    }

    /// Subscribe every live connection of `user_id`.
    pub fn attach_user(&self, user_id: Uuid, scope_id: Uuid) {
        let conn_ids: Vec<Uuid> = self
            .users
            .get(&user_id)
            .map(|conns| conns.keys().copied().collect())
            .unwrap_or_default();
        for conn_id in conn_ids {
            self.attach(conn_id, scope_id);
        }
    }

    /// Subscribe every live connection whose owner has `role`.
    pub fn attach_role(&self, role: Role, scope_id: Uuid) {
        let conn_ids: Vec<Uuid> = self
            .connections
            .iter()
            .filter(|c| c.role == role)
            .map(|c| *c.key())
            .collect();
        for conn_id in conn_ids {
            self.attach(conn_id, scope_id);
        }
    }

    /// Remove one subscription. Idempotent.
    pub fn detach(&self, conn_id: Uuid, scope_id: Uuid) {
        let Some(mut conn) = self.connections.get_mut(&conn_id) else {
            return;
        };
        if conn.scopes.remove(&scope_id) {
            self.scopes.remove_if_mut(&scope_id, |_, subs| {
                subs.remove(&conn_id);
                subs.is_empty()
            });
        }
    }

    /// Drop a connection and every subscription it holds. Idempotent.
    pub fn disconnect(&self, conn_id: Uuid) {
        let Some((_, conn)) = self.connections.remove(&conn_id) else {
            return;
        };
        for scope_id in &conn.scopes {
            self.scopes.remove_if_mut(scope_id, |_, subs| {
                subs.remove(&conn_id);
                subs.is_empty()
            });
        }
        self.users.remove_if_mut(&conn.user_id, |_, conns| {
            conns.remove(&conn_id);
            conns.is_empty()
        });
        debug!(%conn_id, user_id = %conn.user_id, scopes = conn.scopes.len(), "broker: connection removed");
    }

    /// Deliver `frame` to every connection subscribed to `scope_id`.
    /// Returns how many queues accepted it.
    pub fn publish(&self, scope_id: Uuid, frame: &Frame) -> usize {
        let (delivered, closed) = match self.scopes.get(&scope_id) {
            Some(subs) => deliver(subs.value(), frame),
            None => (0, Vec::new()),
        };
        self.prune(closed);
        delivered
    }

    /// Deliver `frame` to every live connection of `user_id`.
    pub fn publish_to_user(&self, user_id: Uuid, frame: &Frame) -> usize {
        let (delivered, closed) = match self.users.get(&user_id) {
            Some(conns) => deliver(conns.value(), frame),
            None => (0, Vec::new()),
        };
        self.prune(closed);
        delivered
    }

    fn prune(&self, closed: Vec<Uuid>) {
        for conn_id in closed {
            self.disconnect(conn_id);
        }
    }

    #[must_use]
    pub fn connection_user(&self, conn_id: Uuid) -> Option<Uuid> {
        self.connections.get(&conn_id).map(|c| c.user_id)
    }

    /// Scopes a connection is subscribed to, sorted for stable output.
    #[must_use]
    pub fn subscriptions(&self, conn_id: Uuid) -> Vec<Uuid> {
        let mut scopes: Vec<Uuid> = self
            .connections
            .get(&conn_id)
            .map(|c| c.scopes.iter().copied().collect())
            .unwrap_or_default();
        scopes.sort_unstable();
        scopes
    }

    #[must_use]
    pub fn subscriber_count(&self, scope_id: Uuid) -> usize {
        self.scopes.get(&scope_id).map_or(0, |s| s.len())
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Best-effort send to each target. Returns the delivered count and the
/// connections whose queue is closed.
fn deliver(targets: &HashMap<Uuid, mpsc::Sender<Frame>>, frame: &Frame) -> (usize, Vec<Uuid>) {
    let mut delivered = 0;
    let mut closed = Vec::new();
    for (conn_id, tx) in targets {
        match tx.try_send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) => {
                debug!(%conn_id, syscall = %frame.syscall, "broker: queue full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%conn_id, syscall = %frame.syscall, "broker: queue closed, event dropped");
                closed.push(*conn_id);
            }
        }
    }
    (delivered, closed)
}

// =============================================================================
// SERVICE OPERATIONS
// =============================================================================

/// Open a live connection for `user_id`, subscribed to every scope the user
/// is a party to. Admins also follow every open complaint.
///
/// The connection is registered before the bootstrap queries run, so a
/// request created or accepted concurrently reaches it through
/// `attach_user` even when the query misses it.
pub async fn connect(state: &AppState, user_id: Uuid) -> Result<ConnectionHandle, CoreError> {
    let user = access::require_user(state, user_id).await?;

    let (id, events) = state.broker.register(user_id, user.role);
    let scope_ids = match bootstrap_scopes(state, &user).await {
        Ok(ids) => ids,
        Err(e) => {
            state.broker.disconnect(id);
            return Err(e);
        }
    };
    for scope_id in &scope_ids {
        state.broker.attach(id, *scope_id);
    }
    let scopes = state.broker.subscriptions(id);

    info!(conn_id = %id, %user_id, role = user.role.as_str(), scopes = scopes.len(), "broker: connected");
    Ok(ConnectionHandle { id, user_id, events, scopes })
}

async fn bootstrap_scopes(state: &AppState, user: &User) -> Result<Vec<Uuid>, CoreError> {
    let mut scope_ids: Vec<Uuid> = state
        .store
        .query_requests(&RequestFilter { party: Some(user.id), ..Default::default() })
        .await?
        .into_iter()
        .map(|r| r.id)
        .collect();

    let complaint_filter = if user.role == Role::Admin {
        ComplaintFilter { statuses: vec![ComplaintStatus::Pending, ComplaintStatus::Reviewed], ..Default::default() }
    } else {
        ComplaintFilter { reporter_id: Some(user.id), ..Default::default() }
    };
    scope_ids.extend(
        state
            .store
            .query_complaints(&complaint_filter)
            .await?
            .into_iter()
            .map(|c| c.id),
    );
    Ok(scope_ids)
}

/// Subscribe a connection to a scope its owner participates in. Idempotent.
pub async fn subscribe(state: &AppState, conn_id: Uuid, scope_id: Uuid) -> Result<(), CoreError> {
    let user_id = state
        .broker
        .connection_user(conn_id)
        .ok_or_else(|| CoreError::not_found("connection", conn_id))?;
    access::authorize_scope(state, scope_id, user_id, "subscribe to").await?;
    if !state.broker.attach(conn_id, scope_id) {
        return Err(CoreError::not_found("connection", conn_id));
    }
    Ok(())
}

/// Unsubscribe a connection from a scope. Idempotent.
pub fn unsubscribe(state: &AppState, conn_id: Uuid, scope_id: Uuid) {
    state.broker.detach(conn_id, scope_id);
}

/// Tear down a connection. Idempotent.
pub fn disconnect(state: &AppState, conn_id: Uuid) {
    state.broker.disconnect(conn_id);
    info!(%conn_id, "broker: disconnected");
}

#[cfg(test)]
#[path = "broker_test.rs"]
mod tests;
