//! Per-scope exclusive locks.
//!
//! DESIGN
//! ======
//! Every write that must be ordered within a scope (request transitions,
//! complaint reviews, chat sequence assignment) runs under the scope's lock,
//! and fan-out for that write happens before the lock is released. That
//! single rule gives first-committer-wins on accept, gapless chat sequences,
//! and per-scope publish order.
//!
//! Locks are created on demand and removed when the last holder or waiter
//! lets go, so the map only holds scopes with in-flight writes.
//!
//! TRADE-OFFS
//! ==========
//! The locks are process-local. Running several server processes against one
//! database would need row locks or advisory locks instead.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct ScopeLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

/// Held for the duration of one serialized write.
pub struct ScopeGuard {
    scope_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ScopeLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `scope_id`.
    pub async fn acquire(&self, scope_id: Uuid) -> ScopeGuard {
        // Clone the Arc out so the map shard is not held across the await.
        let mutex = self.locks.entry(scope_id).or_default().clone();
        let guard = mutex.lock_owned().await;
        ScopeGuard { scope_id, guard: Some(guard), locks: Arc::clone(&self.locks) }
    }

    /// Number of scopes with a live lock entry.
    #[must_use]
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map's own reference is the only one left when nobody else is
        // holding or waiting.
        self.locks
            .remove_if(&self.scope_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
