//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the JSON HTTP API and the websocket endpoint under a single Axum
//! router. Both surfaces are thin translations onto `services::*`; neither
//! holds business rules of its own.

pub mod auth;
pub mod chat;
pub mod complaints;
pub mod notifications;
pub mod requests;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::CoreError;
use crate::frame::ErrorCode;
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/auth/ws-ticket", post(auth::ws_ticket))
        .route("/api/requests", get(requests::list_requests).post(requests::create_request))
        .route("/api/requests/{id}/accept", post(requests::accept_request))
        .route("/api/requests/{id}/reject", post(requests::reject_request))
        .route("/api/requests/{id}/cancel", post(requests::cancel_request))
        .route("/api/requests/{id}/complete", post(requests::complete_request))
        .route("/api/requests/{id}/rate", post(requests::rate_request))
        .route("/api/me/past-providers", get(requests::past_providers))
        .route("/api/scopes/{id}/messages", get(chat::history).post(chat::post_message))
        .route("/api/notifications", get(notifications::list_notifications))
        .route("/api/notifications/{id}/read", post(notifications::mark_read))
        .route("/api/complaints", get(complaints::list_complaints).post(complaints::create_complaint))
        .route("/api/complaints/{id}/review", post(complaints::review_complaint))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

// =============================================================================
// ERROR RESPONSES
// =============================================================================

pub(crate) fn core_error_status(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::InvalidTransition { .. } | CoreError::AlreadyClaimed(_) | CoreError::ScopeClosed(_) => {
            StatusCode::CONFLICT
        }
        CoreError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = core_error_status(&self);
        let message = if let CoreError::Store(e) = &self {
            tracing::error!(error = %e, "store failure");
            "storage failure".to_string()
        } else {
            self.to_string()
        };
        let body = serde_json::json!({ "code": self.error_code(), "message": message });
        (status, Json(body)).into_response()
    }
}
