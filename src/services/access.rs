//! Identity and scope resolution shared by every service.
//!
//! A scope id is either a service request id or a complaint id. Both kinds
//! share one id space, so resolution tries requests first and falls back to
//! complaints.

use uuid::Uuid;

use crate::domain::{Complaint, Role, ScopeKind, ServiceRequest, User};
use crate::error::CoreError;
use crate::state::AppState;

/// Load a user or fail with `NotFound`.
pub async fn require_user(state: &AppState, user_id: Uuid) -> Result<User, CoreError> {
    state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| CoreError::not_found("user", user_id))
}

/// Load a user and check their role, logging an audit record on mismatch.
pub async fn require_role(
    state: &AppState,
    user_id: Uuid,
    role: Role,
    action: &'static str,
    target: Uuid,
) -> Result<User, CoreError> {
    let user = require_user(state, user_id).await?;
    if user.role != role {
        return Err(CoreError::unauthorized(user_id, action, target));
    }
    Ok(user)
}

// =============================================================================
// SCOPES
// =============================================================================

/// The entity behind a scope id.
#[derive(Debug, Clone)]
pub enum ScopeRef {
    Request(ServiceRequest),
    Complaint(Complaint),
}

impl ScopeRef {
    #[must_use]
    pub fn kind(&self) -> ScopeKind {
        match self {
            Self::Request(_) => ScopeKind::Request,
            Self::Complaint(_) => ScopeKind::Complaint,
        }
    }

    /// Whether `user` may read, subscribe to, and post in this scope.
    #[must_use]
    pub fn admits(&self, user: &User) -> bool {
        match self {
            Self::Request(r) => r.is_party(user.id),
            Self::Complaint(c) => c.reporter_id == user.id || user.role == Role::Admin,
        }
    }

    /// Closed scopes keep their history but accept no new messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Request(r) => r.status.is_terminal(),
            Self::Complaint(c) => c.status.is_terminal(),
        }
    }

    /// Who is notified when `sender_id` posts a message here.
    #[must_use]
    pub fn chat_recipients(&self, sender_id: Uuid) -> Vec<Uuid> {
        let candidates = match self {
            Self::Request(r) => vec![Some(r.customer_id), r.provider_id, r.target_provider_id],
            Self::Complaint(c) if sender_id == c.reporter_id => vec![c.handled_by],
            Self::Complaint(c) => vec![Some(c.reporter_id)],
        };
        let mut recipients: Vec<Uuid> = candidates.into_iter().flatten().filter(|id| *id != sender_id).collect();
        recipients.sort_unstable();
        recipients.dedup();
        recipients
    }
}

/// Resolve a scope id to its request or complaint.
pub async fn resolve_scope(state: &AppState, scope_id: Uuid) -> Result<ScopeRef, CoreError> {
    if let Some(request) = state.store.get_request(scope_id).await? {
        return Ok(ScopeRef::Request(request));
    }
    if let Some(complaint) = state.store.get_complaint(scope_id).await? {
        return Ok(ScopeRef::Complaint(complaint));
    }
    Err(CoreError::not_found("scope", scope_id))
}

/// Resolve a scope and require `user_id` to be admitted to it.
pub async fn authorize_scope(
    state: &AppState,
    scope_id: Uuid,
    user_id: Uuid,
    action: &'static str,
) -> Result<(User, ScopeRef), CoreError> {
    let user = require_user(state, user_id).await?;
    let scope = resolve_scope(state, scope_id).await?;
    if !scope.admits(&user) {
        return Err(CoreError::unauthorized(user_id, action, scope_id));
    }
    Ok((user, scope))
}

#[cfg(test)]
#[path = "access_test.rs"]
mod tests;
