//! Complaint workflow: reports raised by users and reviewed by admins.
//!
//! DESIGN
//! ======
//! ```text
//! pending ──▶ reviewed ──▶ resolved | closed
//!    └───────────────────▶ resolved | closed
//! ```
//! A complaint is also a chat scope shared by its reporter and the admins.
//! Reviews run under the complaint's scope lock, like request transitions,
//! and emit `ComplaintStatusChanged` to the reporter.

use serde::Deserialize;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::domain::{Complaint, ComplaintStatus, Role};
use crate::error::CoreError;
use crate::services::access;
use crate::services::events::DomainEvent;
use crate::services::notify;
use crate::state::AppState;
use crate::store::ComplaintFilter;

pub const MAX_TITLE_LEN: usize = 200;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewComplaint {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub provider_id: Option<Uuid>,
    #[serde(default)]
    pub request_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComplaintReview {
    pub status: ComplaintStatus,
    #[serde(default)]
    pub response: Option<String>,
}

/// File a complaint in `pending`.
///
/// # Errors
///
/// `Validation` on an empty title/description or a `provider_id` that is
/// not a provider; `NotFound` for an unknown referenced request;
/// `Unauthorized` if the reporter took no part in that request.
pub async fn create_complaint(state: &AppState, reporter_id: Uuid, input: NewComplaint) -> Result<Complaint, CoreError> {
    let title = input.title.trim();
    let description = input.description.trim();
    if title.is_empty() || description.is_empty() {
        return Err(CoreError::validation("title and description are required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(CoreError::validation(format!("title exceeds {MAX_TITLE_LEN} characters")));
    }

    access::require_user(state, reporter_id).await?;

    if let Some(request_id) = input.request_id {
        let request = state
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CoreError::not_found("request", request_id))?;
        if !request.is_participant(reporter_id) {
            return Err(CoreError::unauthorized(reporter_id, "file complaint about", request_id));
        }
    }
    if let Some(provider_id) = input.provider_id {
        let provider = state.store.get_user(provider_id).await?;
        if provider.is_none_or(|u| u.role != Role::Provider) {
            return Err(CoreError::validation(format!("{provider_id} is not a provider")));
        }
    }

    let complaint = Complaint {
        id: Uuid::new_v4(),
        reporter_id,
        provider_id: input.provider_id,
        request_id: input.request_id,
        title: title.to_string(),
        description: description.to_string(),
        status: ComplaintStatus::Pending,
        admin_response: None,
        handled_by: None,
        created_at: OffsetDateTime::now_utc(),
    };
    state.store.save_complaint(&complaint).await?;
    state.broker.attach_user(reporter_id, complaint.id);
    state.broker.attach_role(Role::Admin, complaint.id);

    info!(complaint_id = %complaint.id, %reporter_id, "complaint: filed");
    Ok(complaint)
}

/// Move a complaint forward and record the admin's response.
///
/// # Errors
///
/// `Unauthorized` for non-admins; `NotFound` for an unknown complaint;
/// `InvalidTransition` for a move the workflow does not allow.
pub async fn review_complaint(
    state: &AppState,
    admin_id: Uuid,
    complaint_id: Uuid,
    review: ComplaintReview,
) -> Result<Complaint, CoreError> {
    access::require_role(state, admin_id, Role::Admin, "review complaint", complaint_id).await?;

    let _guard = state.locks.acquire(complaint_id).await;
    let mut complaint = state
        .store
        .get_complaint(complaint_id)
        .await?
        .ok_or_else(|| CoreError::not_found("complaint", complaint_id))?;

    if !complaint.status.can_transition_to(review.status) {
        return Err(CoreError::InvalidTransition { from: complaint.status.as_str(), to: review.status.as_str() });
    }

    let old = complaint.status;
    complaint.status = review.status;
    complaint.handled_by = Some(admin_id);
    if let Some(response) = review.response.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()) {
        complaint.admin_response = Some(response);
    }
    state.store.save_complaint(&complaint).await?;

    info!(%complaint_id, %admin_id, from = old.as_str(), to = complaint.status.as_str(), "complaint: reviewed");
    let event = DomainEvent::complaint_status_changed(&complaint, old, admin_id);
    notify::dispatch(state, &event).await;
    Ok(complaint)
}

/// Complaints visible to `user_id`, newest first: all for admins, otherwise
/// the user's own.
pub async fn list_complaints(state: &AppState, user_id: Uuid) -> Result<Vec<Complaint>, CoreError> {
    let user = access::require_user(state, user_id).await?;
    let filter = if user.role == Role::Admin {
        ComplaintFilter::default()
    } else {
        ComplaintFilter { reporter_id: Some(user_id), ..Default::default() }
    };
    Ok(state.store.query_complaints(&filter).await?)
}

#[cfg(test)]
#[path = "complaint_test.rs"]
mod tests;
