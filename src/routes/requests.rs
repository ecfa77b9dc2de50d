//! Service request routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::ServiceRequest;
use crate::error::CoreError;
use crate::routes::auth::AuthUser;
use crate::services::lifecycle::{self, NewRequest};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CompleteBody {
    #[serde(default)]
    pub rating: Option<u8>,
}

#[derive(Debug, Deserialize)]
pub struct RateBody {
    pub rating: u8,
}

/// `GET /api/requests`: requests visible to the caller, newest first.
pub async fn list_requests(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Vec<ServiceRequest>>, CoreError> {
    Ok(Json(lifecycle::list_requests(&state, auth.user_id).await?))
}

/// `POST /api/requests`: open a new request.
pub async fn create_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<NewRequest>,
) -> Result<(StatusCode, Json<ServiceRequest>), CoreError> {
    let request = lifecycle::create(&state, auth.user_id, body).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// `POST /api/requests/:id/accept`
pub async fn accept_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceRequest>, CoreError> {
    Ok(Json(lifecycle::accept(&state, id, auth.user_id).await?))
}

/// `POST /api/requests/:id/reject`
pub async fn reject_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceRequest>, CoreError> {
    Ok(Json(lifecycle::reject(&state, id, auth.user_id).await?))
}

/// `POST /api/requests/:id/cancel`
pub async fn cancel_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceRequest>, CoreError> {
    Ok(Json(lifecycle::cancel(&state, id, auth.user_id).await?))
}

/// `POST /api/requests/:id/complete`: body `{"rating": 1..5}` or `{}`.
pub async fn complete_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<CompleteBody>,
) -> Result<Json<ServiceRequest>, CoreError> {
    Ok(Json(lifecycle::complete(&state, id, auth.user_id, body.rating).await?))
}

/// `POST /api/requests/:id/rate`
pub async fn rate_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<RateBody>,
) -> Result<Json<ServiceRequest>, CoreError> {
    Ok(Json(lifecycle::rate(&state, id, auth.user_id, body.rating).await?))
}

/// `GET /api/me/past-providers`
pub async fn past_providers(State(state): State<AppState>, auth: AuthUser) -> Result<Json<serde_json::Value>, CoreError> {
    let ids = lifecycle::past_providers(&state, auth.user_id).await?;
    Ok(Json(serde_json::json!({ "provider_ids": ids })))
}

#[cfg(test)]
#[path = "requests_test.rs"]
mod tests;
