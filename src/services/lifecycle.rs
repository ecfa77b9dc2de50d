//! Request Lifecycle Engine: the service request state machine.
//!
//! DESIGN
//! ======
//! ```text
//! pending ──accept──▶ accepted ──complete──▶ completed
//!    │                   │
//!    ├──reject*──▶ rejected
//!    └──cancel──▶ cancelled ◀──cancel──┘
//! ```
//! `*` Only a targeted request (booked with one provider) becomes
//! `rejected`, and only when that provider declines. Declining an open
//! request records a per-provider marker and leaves the status alone.
//! The booked provider is a party from creation: subscribed, notified of
//! every transition, and admitted to the conversation.
//!
//! Every transition takes the request's scope lock, re-reads the request,
//! validates, saves, then dispatches `RequestStatusChanged` before
//! releasing the lock. Two providers racing to accept are therefore
//! serialized: the second one sees `accepted` and gets `AlreadyClaimed`.

use serde::Deserialize;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::domain::{RequestStatus, Role, ServiceRequest};
use crate::error::CoreError;
use crate::services::access;
use crate::services::events::DomainEvent;
use crate::services::notify;
use crate::state::AppState;
use crate::store::RequestFilter;

pub const MAX_CATEGORY_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 4000;

/// Fields a customer supplies when opening a request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRequest {
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub target_provider_id: Option<Uuid>,
}

// =============================================================================
// CREATE
// =============================================================================

/// Open a new request in `pending`.
///
/// # Errors
///
/// `Validation` on an empty or oversized category/description or a target
/// that is not a provider; `Unauthorized` if the caller is not a customer.
pub async fn create(state: &AppState, customer_id: Uuid, input: NewRequest) -> Result<ServiceRequest, CoreError> {
    let category = input.category.trim();
    let description = input.description.trim();
    if category.is_empty() {
        return Err(CoreError::validation("category must not be empty"));
    }
    if description.is_empty() {
        return Err(CoreError::validation("description must not be empty"));
    }
    if category.chars().count() > MAX_CATEGORY_LEN || description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(CoreError::validation("category or description too long"));
    }

    access::require_role(state, customer_id, Role::Customer, "create request as", customer_id).await?;

    if let Some(target_id) = input.target_provider_id {
        let target = state.store.get_user(target_id).await?;
        if target.is_none_or(|u| u.role != Role::Provider) {
            return Err(CoreError::validation(format!("{target_id} is not a provider")));
        }
    }

    let request = ServiceRequest {
        id: Uuid::new_v4(),
        customer_id,
        provider_id: None,
        target_provider_id: input.target_provider_id,
        category: category.to_string(),
        description: description.to_string(),
        status: RequestStatus::Pending,
        created_at: OffsetDateTime::now_utc(),
        completed_at: None,
        rating: None,
    };
    state.store.save_request(&request).await?;
    state.broker.attach_user(customer_id, request.id);
    if let Some(target_id) = request.target_provider_id {
        state.broker.attach_user(target_id, request.id);
    }

    info!(request_id = %request.id, %customer_id, category = %request.category, "lifecycle: request created");
    Ok(request)
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Claim a pending request. Exactly one concurrent caller wins.
///
/// # Errors
///
/// `AlreadyClaimed` if another provider accepted first; `InvalidTransition`
/// from any other non-pending status; `Unauthorized` for non-providers, the
/// request's own customer, or a provider other than the booked one.
pub async fn accept(state: &AppState, request_id: Uuid, provider_id: Uuid) -> Result<ServiceRequest, CoreError> {
    access::require_role(state, provider_id, Role::Provider, "accept", request_id).await?;

    let _guard = state.locks.acquire(request_id).await;
    let mut request = load(state, request_id).await?;

    match request.status {
        RequestStatus::Pending => {}
        RequestStatus::Accepted => return Err(CoreError::AlreadyClaimed(request_id)),
        other => return Err(invalid(other, RequestStatus::Accepted)),
    }
    if request.customer_id == provider_id {
        return Err(CoreError::unauthorized(provider_id, "accept own request", request_id));
    }
    if request.target_provider_id.is_some_and(|t| t != provider_id) {
        return Err(CoreError::unauthorized(provider_id, "accept request booked with another provider", request_id));
    }

    let old = request.status;
    request.status = RequestStatus::Accepted;
    request.provider_id = Some(provider_id);
    state.store.save_request(&request).await?;
    state.broker.attach_user(provider_id, request_id);

    commit(state, &request, old, provider_id).await;
    Ok(request)
}

/// Decline a pending request.
///
/// An open request keeps its status and is hidden from this provider from
/// now on. A request booked with this provider moves to `rejected`.
///
/// # Errors
///
/// `InvalidTransition` if the request is no longer pending; `Unauthorized`
/// for non-providers or a request booked with another provider.
pub async fn reject(state: &AppState, request_id: Uuid, provider_id: Uuid) -> Result<ServiceRequest, CoreError> {
    access::require_role(state, provider_id, Role::Provider, "reject", request_id).await?;

    let _guard = state.locks.acquire(request_id).await;
    let mut request = load(state, request_id).await?;

    if request.status != RequestStatus::Pending {
        return Err(invalid(request.status, RequestStatus::Rejected));
    }

    match request.target_provider_id {
        None => {
            state.store.record_decline(request_id, provider_id).await?;
            info!(%request_id, %provider_id, "lifecycle: request declined");
            Ok(request)
        }
        Some(target) if target == provider_id => {
            let old = request.status;
            request.status = RequestStatus::Rejected;
            state.store.save_request(&request).await?;
            commit(state, &request, old, provider_id).await;
            Ok(request)
        }
        Some(_) => Err(CoreError::unauthorized(provider_id, "reject request booked with another provider", request_id)),
    }
}

/// Cancel a pending or accepted request.
///
/// # Errors
///
/// `Unauthorized` unless the actor is the customer or the assigned provider;
/// `InvalidTransition` from a terminal status.
pub async fn cancel(state: &AppState, request_id: Uuid, actor_id: Uuid) -> Result<ServiceRequest, CoreError> {
    let _guard = state.locks.acquire(request_id).await;
    let mut request = load(state, request_id).await?;

    if !request.is_participant(actor_id) {
        return Err(CoreError::unauthorized(actor_id, "cancel", request_id));
    }
    transition(&request, RequestStatus::Cancelled)?;

    let old = request.status;
    request.status = RequestStatus::Cancelled;
    state.store.save_request(&request).await?;

    commit(state, &request, old, actor_id).await;
    Ok(request)
}

/// Complete an accepted request, optionally with a 1–5 rating.
///
/// # Errors
///
/// `Validation` for an out-of-range rating; `Unauthorized` unless the actor
/// is the customer or the assigned provider; `InvalidTransition` unless the
/// request is `accepted`.
pub async fn complete(
    state: &AppState,
    request_id: Uuid,
    actor_id: Uuid,
    rating: Option<u8>,
) -> Result<ServiceRequest, CoreError> {
    if let Some(r) = rating {
        validate_rating(r)?;
    }

    let _guard = state.locks.acquire(request_id).await;
    let mut request = load(state, request_id).await?;

    if !request.is_participant(actor_id) {
        return Err(CoreError::unauthorized(actor_id, "complete", request_id));
    }
    transition(&request, RequestStatus::Completed)?;

    let old = request.status;
    request.status = RequestStatus::Completed;
    request.completed_at = Some(OffsetDateTime::now_utc());
    request.rating = rating;
    state.store.save_request(&request).await?;

    commit(state, &request, old, actor_id).await;
    Ok(request)
}

/// Rate a completed request after the fact. Emits no lifecycle event.
///
/// # Errors
///
/// `Validation` for an out-of-range rating, a request that is not
/// completed, or one already rated; `Unauthorized` unless the actor is the
/// request's customer.
pub async fn rate(state: &AppState, request_id: Uuid, customer_id: Uuid, rating: u8) -> Result<ServiceRequest, CoreError> {
    validate_rating(rating)?;

    let _guard = state.locks.acquire(request_id).await;
    let mut request = load(state, request_id).await?;

    if request.customer_id != customer_id {
        return Err(CoreError::unauthorized(customer_id, "rate", request_id));
    }
    if request.status != RequestStatus::Completed {
        return Err(CoreError::validation("only completed requests can be rated"));
    }
    if request.rating.is_some() {
        return Err(CoreError::validation("request already rated"));
    }

    request.rating = Some(rating);
    state.store.save_request(&request).await?;
    info!(%request_id, %customer_id, rating, "lifecycle: request rated");
    Ok(request)
}

// =============================================================================
// QUERIES
// =============================================================================

/// Requests visible to `user_id`, newest first.
///
/// Customers see their own. Providers see pending requests open to them that
/// they have not declined, plus requests assigned to them. Admins see all.
pub async fn list_requests(state: &AppState, user_id: Uuid) -> Result<Vec<ServiceRequest>, CoreError> {
    let user = access::require_user(state, user_id).await?;
    let store = &state.store;

    let mut requests = match user.role {
        Role::Admin => store.query_requests(&RequestFilter::default()).await?,
        Role::Customer => {
            store
                .query_requests(&RequestFilter { customer_id: Some(user_id), ..Default::default() })
                .await?
        }
        Role::Provider => {
            let pending = |open_only: bool, target_provider_id: Option<Uuid>| RequestFilter {
                statuses: vec![RequestStatus::Pending],
                open_only,
                target_provider_id,
                hide_declined_for: Some(user_id),
                ..Default::default()
            };
            let mut all = store.query_requests(&pending(true, None)).await?;
            all.extend(store.query_requests(&pending(false, Some(user_id))).await?);
            all.extend(
                store
                    .query_requests(&RequestFilter { provider_id: Some(user_id), ..Default::default() })
                    .await?,
            );
            all
        }
    };

    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    requests.dedup_by_key(|r| r.id);
    Ok(requests)
}

/// Distinct providers a customer has worked with (accepted or completed).
pub async fn past_providers(state: &AppState, customer_id: Uuid) -> Result<Vec<Uuid>, CoreError> {
    let filter = RequestFilter {
        customer_id: Some(customer_id),
        statuses: vec![RequestStatus::Accepted, RequestStatus::Completed],
        ..Default::default()
    };
    let mut providers: Vec<Uuid> = state
        .store
        .query_requests(&filter)
        .await?
        .into_iter()
        .filter_map(|r| r.provider_id)
        .collect();
    providers.sort_unstable();
    providers.dedup();
    Ok(providers)
}

// =============================================================================
// HELPERS
// =============================================================================

async fn load(state: &AppState, request_id: Uuid) -> Result<ServiceRequest, CoreError> {
    state
        .store
        .get_request(request_id)
        .await?
        .ok_or_else(|| CoreError::not_found("request", request_id))
}

fn invalid(from: RequestStatus, to: RequestStatus) -> CoreError {
    CoreError::InvalidTransition { from: from.as_str(), to: to.as_str() }
}

fn transition(request: &ServiceRequest, next: RequestStatus) -> Result<(), CoreError> {
    if request.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(invalid(request.status, next))
    }
}

fn validate_rating(rating: u8) -> Result<(), CoreError> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err(CoreError::validation(format!("rating must be 1-5, got {rating}")))
    }
}

/// Log and fan out a saved transition. Caller still holds the scope lock.
async fn commit(state: &AppState, request: &ServiceRequest, old: RequestStatus, actor_id: Uuid) {
    info!(
        request_id = %request.id,
        %actor_id,
        from = old.as_str(),
        to = request.status.as_str(),
        "lifecycle: transition"
    );
    let event = DomainEvent::request_status_changed(request, old, actor_id);
    notify::dispatch(state, &event).await;
}

#[cfg(test)]
#[path = "lifecycle_test.rs"]
mod tests;
