//! Scope conversation routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::ChatMessage;
use crate::error::CoreError;
use crate::routes::auth::AuthUser;
use crate::services::chat;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub after_seq: i64,
}

#[derive(Debug, Deserialize)]
pub struct PostBody {
    pub body: String,
}

/// `GET /api/scopes/:id/messages?after_seq=N`
pub async fn history(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(scope_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, CoreError> {
    Ok(Json(chat::history_after(&state, scope_id, auth.user_id, query.after_seq).await?))
}

/// `POST /api/scopes/:id/messages`
pub async fn post_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(scope_id): Path<Uuid>,
    Json(body): Json<PostBody>,
) -> Result<(StatusCode, Json<ChatMessage>), CoreError> {
    let message = chat::post_message(&state, scope_id, auth.user_id, &body.body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}
