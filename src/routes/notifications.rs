//! Notification inbox routes.

use axum::extract::{Path, State};
use axum::response::Json;
use uuid::Uuid;

use crate::domain::Notification;
use crate::error::CoreError;
use crate::routes::auth::AuthUser;
use crate::services::notify;
use crate::state::AppState;

/// `GET /api/notifications`: the caller's notifications, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Notification>>, CoreError> {
    Ok(Json(notify::list_notifications(&state, auth.user_id).await?))
}

/// `POST /api/notifications/:id/read`
pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, CoreError> {
    Ok(Json(notify::mark_read(&state, id, auth.user_id).await?))
}
