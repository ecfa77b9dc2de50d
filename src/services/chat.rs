//! Chat Session: ordered per-scope message streams.
//!
//! DESIGN
//! ======
//! Sequence numbers are assigned under the scope lock as `last + 1`, so they
//! start at 1 and have no gaps. The same lock guards request transitions,
//! so a message can never slip in after the request reached a terminal
//! status. The store's `(scope_id, seq)` uniqueness is the backstop.

use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::domain::ChatMessage;
use crate::error::CoreError;
use crate::services::access;
use crate::services::events::DomainEvent;
use crate::services::notify;
use crate::state::AppState;

pub const MAX_MESSAGE_LEN: usize = 4000;

/// Append a message to a scope's conversation.
///
/// # Errors
///
/// `Validation` for an empty or oversized body; `NotFound` for an unknown
/// scope; `Unauthorized` for non-participants; `ScopeClosed` once the
/// request or complaint is finished.
pub async fn post_message(state: &AppState, scope_id: Uuid, sender_id: Uuid, body: &str) -> Result<ChatMessage, CoreError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(CoreError::validation("message body must not be empty"));
    }
    if body.chars().count() > MAX_MESSAGE_LEN {
        return Err(CoreError::validation(format!("message body exceeds {MAX_MESSAGE_LEN} characters")));
    }

    let _guard = state.locks.acquire(scope_id).await;
    let (_, scope) = access::authorize_scope(state, scope_id, sender_id, "post in").await?;
    if scope.is_closed() {
        return Err(CoreError::ScopeClosed(scope_id));
    }

    let seq = state.store.last_sequence(scope_id).await? + 1;
    let message = ChatMessage {
        id: Uuid::new_v4(),
        scope_id,
        scope_kind: scope.kind(),
        sender_id,
        body: body.to_string(),
        created_at: OffsetDateTime::now_utc(),
        seq,
    };
    state.store.append_message(&message).await?;
    info!(%scope_id, %sender_id, seq, "chat: message posted");

    let event = DomainEvent::chat_message_posted(&message, scope.chat_recipients(sender_id));
    notify::dispatch(state, &event).await;
    Ok(message)
}

/// Full conversation of a scope, oldest first.
///
/// # Errors
///
/// `NotFound` for an unknown scope; `Unauthorized` for non-participants.
pub async fn history(state: &AppState, scope_id: Uuid, requester_id: Uuid) -> Result<Vec<ChatMessage>, CoreError> {
    history_after(state, scope_id, requester_id, 0).await
}

/// Messages with a sequence number greater than `after_seq`, oldest first.
/// Reconnecting clients pass the last sequence they saw.
///
/// # Errors
///
/// Same as [`history`].
pub async fn history_after(
    state: &AppState,
    scope_id: Uuid,
    requester_id: Uuid,
    after_seq: i64,
) -> Result<Vec<ChatMessage>, CoreError> {
    access::authorize_scope(state, scope_id, requester_id, "read history of").await?;
    Ok(state.store.list_messages(scope_id, after_seq.max(0)).await?)
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
