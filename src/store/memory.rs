//! In-process `EntityStore` backed by `DashMap`s.
//!
//! Used by the test suite and by `STORE_BACKEND=memory` for local runs.
//! Nothing survives a restart.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{ComplaintFilter, EntityStore, RequestFilter};
use crate::domain::{ChatMessage, Complaint, Notification, ServiceRequest, User};
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<Uuid, User>,
    requests: DashMap<Uuid, ServiceRequest>,
    /// provider id -> request ids they declined.
    declines: DashMap<Uuid, HashSet<Uuid>>,
    complaints: DashMap<Uuid, Complaint>,
    notifications: DashMap<Uuid, Notification>,
    /// scope id -> messages ordered by seq.
    messages: DashMap<Uuid, Vec<ChatMessage>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn declined(&self, provider_id: Uuid, request_id: Uuid) -> bool {
        self.declines
            .get(&provider_id)
            .is_some_and(|set| set.contains(&request_id))
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<ServiceRequest>, StoreError> {
        Ok(self.requests.get(&id).map(|r| r.clone()))
    }

    async fn save_request(&self, request: &ServiceRequest) -> Result<(), StoreError> {
        self.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn query_requests(&self, filter: &RequestFilter) -> Result<Vec<ServiceRequest>, StoreError> {
        let mut out: Vec<ServiceRequest> = self
            .requests
            .iter()
            .filter(|r| filter.matches(r.value()))
            .filter(|r| {
                filter
                    .hide_declined_for
                    .is_none_or(|provider_id| !self.declined(provider_id, r.id))
            })
            .map(|r| r.value().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn record_decline(&self, request_id: Uuid, provider_id: Uuid) -> Result<(), StoreError> {
        self.declines.entry(provider_id).or_default().insert(request_id);
        Ok(())
    }

    async fn get_complaint(&self, id: Uuid) -> Result<Option<Complaint>, StoreError> {
        Ok(self.complaints.get(&id).map(|c| c.clone()))
    }

    async fn save_complaint(&self, complaint: &Complaint) -> Result<(), StoreError> {
        self.complaints.insert(complaint.id, complaint.clone());
        Ok(())
    }

    async fn query_complaints(&self, filter: &ComplaintFilter) -> Result<Vec<Complaint>, StoreError> {
        let mut out: Vec<Complaint> = self
            .complaints
            .iter()
            .filter(|c| filter.matches(c.value()))
            .map(|c| c.value().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>, StoreError> {
        Ok(self.notifications.get(&id).map(|n| n.clone()))
    }

    async fn save_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        self.notifications.insert(notification.id, notification.clone());
        Ok(())
    }

    async fn list_notifications(&self, recipient_id: Uuid) -> Result<Vec<Notification>, StoreError> {
        let mut out: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .map(|n| n.value().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut log = self.messages.entry(message.scope_id).or_default();
        match log.binary_search_by_key(&message.seq, |m| m.seq) {
            Ok(_) => Err(StoreError::DuplicateSequence { scope_id: message.scope_id, seq: message.seq }),
            Err(pos) => {
                log.insert(pos, message.clone());
                Ok(())
            }
        }
    }

    async fn list_messages(&self, scope_id: Uuid, after_seq: i64) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .messages
            .get(&scope_id)
            .map(|log| log.iter().filter(|m| m.seq > after_seq).cloned().collect())
            .unwrap_or_default())
    }

    async fn last_sequence(&self, scope_id: Uuid) -> Result<i64, StoreError> {
        Ok(self
            .messages
            .get(&scope_id)
            .and_then(|log| log.last().map(|m| m.seq))
            .unwrap_or(0))
    }
}
