//! Entity Store: durable storage behind a narrow async contract.
//!
//! ARCHITECTURE
//! ============
//! The core needs get-by-id, per-entity atomic upsert, and a handful of
//! filtered queries (connection bootstrap, role-aware listings). `PgStore`
//! backs production; `MemoryStore` backs tests and the `memory` backend.
//!
//! Chat messages are append-only: `append_message` must refuse a duplicate
//! `(scope_id, seq)` pair so a sequencing bug surfaces instead of silently
//! overwriting history.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{ChatMessage, Complaint, ComplaintStatus, Notification, RequestStatus, ServiceRequest, User};
use crate::error::StoreError;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// =============================================================================
// FILTERS
// =============================================================================

/// Query over service requests. Every populated field narrows the result.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    /// Customer, assigned provider, or booked provider.
    pub party: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
    /// Empty means any status.
    pub statuses: Vec<RequestStatus>,
    /// Only requests open to every provider (no `target_provider_id`).
    pub open_only: bool,
    pub target_provider_id: Option<Uuid>,
    /// Drop requests this provider has declined.
    pub hide_declined_for: Option<Uuid>,
}

impl RequestFilter {
    #[must_use]
    pub fn matches(&self, req: &ServiceRequest) -> bool {
        if let Some(user_id) = self.party {
            if !req.is_party(user_id) {
                return false;
            }
        }
        if self.customer_id.is_some_and(|id| req.customer_id != id) {
            return false;
        }
        if self.provider_id.is_some() && req.provider_id != self.provider_id {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&req.status) {
            return false;
        }
        if self.open_only && req.target_provider_id.is_some() {
            return false;
        }
        if self.target_provider_id.is_some() && req.target_provider_id != self.target_provider_id {
            return false;
        }
        true
    }
}

/// Query over complaints.
#[derive(Debug, Clone, Default)]
pub struct ComplaintFilter {
    pub reporter_id: Option<Uuid>,
    /// Empty means any status.
    pub statuses: Vec<ComplaintStatus>,
}

impl ComplaintFilter {
    #[must_use]
    pub fn matches(&self, complaint: &Complaint) -> bool {
        if self.reporter_id.is_some_and(|id| complaint.reporter_id != id) {
            return false;
        }
        self.statuses.is_empty() || self.statuses.contains(&complaint.status)
    }
}

// =============================================================================
// CONTRACT
// =============================================================================

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn save_user(&self, user: &User) -> Result<(), StoreError>;

    async fn get_request(&self, id: Uuid) -> Result<Option<ServiceRequest>, StoreError>;
    async fn save_request(&self, request: &ServiceRequest) -> Result<(), StoreError>;
    /// Matching requests, newest first.
    async fn query_requests(&self, filter: &RequestFilter) -> Result<Vec<ServiceRequest>, StoreError>;
    /// Record that a provider declined a request. Idempotent.
    async fn record_decline(&self, request_id: Uuid, provider_id: Uuid) -> Result<(), StoreError>;

    async fn get_complaint(&self, id: Uuid) -> Result<Option<Complaint>, StoreError>;
    async fn save_complaint(&self, complaint: &Complaint) -> Result<(), StoreError>;
    /// Matching complaints, newest first.
    async fn query_complaints(&self, filter: &ComplaintFilter) -> Result<Vec<Complaint>, StoreError>;

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>, StoreError>;
    async fn save_notification(&self, notification: &Notification) -> Result<(), StoreError>;
    /// A user's notifications, newest first.
    async fn list_notifications(&self, recipient_id: Uuid) -> Result<Vec<Notification>, StoreError>;

    /// Append one message. Fails with `DuplicateSequence` if the slot is taken.
    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError>;
    /// Messages with `seq > after_seq`, ascending.
    async fn list_messages(&self, scope_id: Uuid, after_seq: i64) -> Result<Vec<ChatMessage>, StoreError>;
    /// Highest assigned sequence number in a scope, 0 when empty.
    async fn last_sequence(&self, scope_id: Uuid) -> Result<i64, StoreError>;
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
