//! Notification Dispatcher: turns committed domain events into live
//! broadcasts and persisted per-recipient notifications.
//!
//! DESIGN
//! ======
//! `dispatch` runs inside the caller's scope lock, right after the state
//! change is saved:
//!
//! 1. Publish the event frame to the scope's subscribers.
//! 2. For each affected recipient, persist one `Notification`, then push a
//!    `notification` frame to that recipient's live connections.
//!
//! Recipients:
//! - request status change → customer, assigned provider and booked
//!   provider, minus the actor
//! - chat message → the scope's other participants
//! - complaint status change → the reporter
//!
//! ERROR HANDLING
//! ==============
//! The triggering change is already committed when dispatch runs, so a
//! failed notification write is logged and skipped rather than reported to
//! the actor. Live delivery is never retried.

use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::Notification;
use crate::error::CoreError;
use crate::frame::{Data, Frame};
use crate::services::events::{DomainEvent, EVENT_NOTIFICATION};
use crate::state::AppState;

/// Fan one committed event out to the scope and its recipients.
pub async fn dispatch(state: &AppState, event: &DomainEvent) {
    let scope_id = event.scope_id();
    let delivered = state.broker.publish(scope_id, &event.to_frame());
    debug!(%scope_id, kind = event.kind().as_str(), delivered, "notify: event published");

    let source = event.event_ref();
    for recipient_id in recipients(event) {
        let notification = Notification {
            id: Uuid::new_v4(),
            recipient_id,
            message: describe(event),
            is_read: false,
            created_at: OffsetDateTime::now_utc(),
            source,
        };
        if let Err(e) = state.store.save_notification(&notification).await {
            warn!(error = %e, %recipient_id, event_id = %source.event_id, "notify: notification write failed");
            continue;
        }
        state
            .broker
            .publish_to_user(recipient_id, &notification_frame(&notification));
    }
}

/// Users who get a persisted notification for `event`.
#[must_use]
pub fn recipients(event: &DomainEvent) -> Vec<Uuid> {
    let mut ids = match event {
        DomainEvent::RequestStatusChanged { request, actor_id, .. } => {
            [Some(request.customer_id), request.provider_id, request.target_provider_id]
                .into_iter()
                .flatten()
                .filter(|id| id != actor_id)
                .collect()
        }
        DomainEvent::ChatMessagePosted { recipients, .. } => recipients.clone(),
        DomainEvent::ComplaintStatusChanged { complaint, .. } => vec![complaint.reporter_id],
    };
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Human-readable notification text.
fn describe(event: &DomainEvent) -> String {
    match event {
        DomainEvent::RequestStatusChanged { request, old_status, new_status, .. } => format!(
            "Your {} request changed from {} to {}",
            request.category,
            old_status.as_str(),
            new_status.as_str()
        ),
        DomainEvent::ChatMessagePosted { message, .. } => {
            format!("New message in {} conversation", message.scope_kind.as_str())
        }
        DomainEvent::ComplaintStatusChanged { complaint, new_status, .. } => {
            format!("Your complaint \"{}\" is now {}", complaint.title, new_status.as_str())
        }
    }
}

fn notification_frame(notification: &Notification) -> Frame {
    let mut data = Data::new();
    data.insert(
        "notification".into(),
        serde_json::to_value(notification).unwrap_or_default(),
    );
    Frame::event(EVENT_NOTIFICATION, notification.source.scope_id, data)
}

// =============================================================================
// QUERIES
// =============================================================================

/// A user's notifications, newest first.
pub async fn list_notifications(state: &AppState, user_id: Uuid) -> Result<Vec<Notification>, CoreError> {
    Ok(state.store.list_notifications(user_id).await?)
}

/// Mark a notification read. Only its recipient may do so. Idempotent.
pub async fn mark_read(state: &AppState, notification_id: Uuid, user_id: Uuid) -> Result<Notification, CoreError> {
    let mut notification = state
        .store
        .get_notification(notification_id)
        .await?
        .ok_or_else(|| CoreError::not_found("notification", notification_id))?;
    if notification.recipient_id != user_id {
        return Err(CoreError::unauthorized(user_id, "mark read", notification_id));
    }
    if !notification.is_read {
        notification.is_read = true;
        state.store.save_notification(&notification).await?;
    }
    Ok(notification)
}

#[cfg(test)]
#[path = "notify_test.rs"]
mod tests;
