//! Complaint routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use uuid::Uuid;

use crate::domain::Complaint;
use crate::error::CoreError;
use crate::routes::auth::AuthUser;
use crate::services::complaint::{self, ComplaintReview, NewComplaint};
use crate::state::AppState;

/// `GET /api/complaints`: own complaints, or all for admins.
pub async fn list_complaints(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Vec<Complaint>>, CoreError> {
    Ok(Json(complaint::list_complaints(&state, auth.user_id).await?))
}

/// `POST /api/complaints`
pub async fn create_complaint(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<NewComplaint>,
) -> Result<(StatusCode, Json<Complaint>), CoreError> {
    let created = complaint::create_complaint(&state, auth.user_id, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `POST /api/complaints/:id/review`: admin only.
pub async fn review_complaint(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ComplaintReview>,
) -> Result<Json<Complaint>, CoreError> {
    Ok(Json(complaint::review_complaint(&state, auth.user_id, id, body).await?))
}
