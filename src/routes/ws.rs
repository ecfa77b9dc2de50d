//! WebSocket handler: bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, opens a broker connection (bootstrapped with every scope the
//! user participates in) and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Live events from the broker queue → forward to client
//!
//! Handler functions translate a frame into one service call and return an
//! `Outcome`. Live fan-out is the services' job; the dispatch layer only
//! replies to the sender.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `connection_id` and `scopes`
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Dispatch turns the Outcome into a done/error reply
//! 4. Close → broker disconnect drops every subscription

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::frame::{Data, Frame};
use crate::services::{broker, chat, complaint, lifecycle, notify};
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions.
enum Outcome {
    /// Send done+data to sender.
    Reply(Data),
    /// Send empty done to sender.
    Done,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(ticket) = params.get("ticket") else {
        return (StatusCode::UNAUTHORIZED, "ticket required").into_response();
    };

    let user_id = match state.auth.consume_ws_ticket(ticket).await {
        Ok(Some(uid)) => uid,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "invalid or expired ticket").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "ws ticket validation failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "ticket validation error").into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, user_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user_id: Uuid) {
    let mut conn = match broker::connect(&state, user_id).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(%user_id, error = %e, "ws: connect failed");
            let err = Frame::request("session:connected", Data::new()).error_from(&e);
            let _ = send_frame(&mut socket, &err).await;
            return;
        }
    };
    let conn_id = conn.id;

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("connection_id", conn_id.to_string())
        .with_data("user_id", user_id.to_string())
        .with_data("scopes", serde_json::json!(conn.scopes));
    if send_frame(&mut socket, &welcome).await.is_err() {
        broker::disconnect(&state, conn_id);
        return;
    }

    info!(%conn_id, %user_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, conn_id, user_id, &text).await;
                        for frame in replies {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = conn.events.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    broker::disconnect(&state, conn_id);
    info!(%conn_id, "ws: client disconnected");
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let Ok(json) = serde_json::to_string(frame) else {
        return Err(());
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Kept apart from the socket so tests can drive frame handling without a
/// live websocket.
async fn process_inbound_text(state: &AppState, conn_id: Uuid, user_id: Uuid, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%conn_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the authenticated user_id as `from`.
    req.from = Some(user_id.to_string());
    info!(%conn_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "request" => handle_request(state, user_id, &req).await,
        "chat" => handle_chat(state, user_id, &req).await,
        "scope" => handle_scope(state, conn_id, &req).await,
        "notification" => handle_notification(state, user_id, &req).await,
        "complaint" => handle_complaint(state, user_id, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// REQUEST HANDLERS
// =============================================================================

async fn handle_request(state: &AppState, user_id: Uuid, req: &Frame) -> Result<Outcome, Frame> {
    let op = req.op();

    if op == "create" {
        let input: lifecycle::NewRequest = parse_data(req)?;
        let created = lifecycle::create(state, user_id, input).await.map_err(|e| req.error_from(&e))?;
        return Ok(reply_with("request", &created));
    }
    if op == "list" {
        let list = lifecycle::list_requests(state, user_id).await.map_err(|e| req.error_from(&e))?;
        return Ok(reply_with("requests", &list));
    }

    let request_id = require_uuid(req, "request_id")?;
    let result = match op {
        "accept" => lifecycle::accept(state, request_id, user_id).await,
        "reject" => lifecycle::reject(state, request_id, user_id).await,
        "cancel" => lifecycle::cancel(state, request_id, user_id).await,
        "complete" => {
            let rating = rating_field(req)?;
            lifecycle::complete(state, request_id, user_id, rating).await
        }
        "rate" => {
            let Some(rating) = rating_field(req)? else {
                return Err(req.error_from(&CoreError::validation("rating required")));
            };
            lifecycle::rate(state, request_id, user_id, rating).await
        }
        _ => return Err(req.error(format!("unknown request op: {op}"))),
    };
    let request = result.map_err(|e| req.error_from(&e))?;
    Ok(reply_with("request", &request))
}

// =============================================================================
// CHAT HANDLERS
// =============================================================================

async fn handle_chat(state: &AppState, user_id: Uuid, req: &Frame) -> Result<Outcome, Frame> {
    let scope_id = require_uuid(req, "scope_id")?;

    match req.op() {
        "message" => {
            let body = req.str_field("body").unwrap_or_default();
            let message = chat::post_message(state, scope_id, user_id, body)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(reply_with("message", &message))
        }
        "history" => {
            let after_seq = req
                .data
                .get("after_seq")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0);
            let messages = chat::history_after(state, scope_id, user_id, after_seq)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(reply_with("messages", &messages))
        }
        op => Err(req.error(format!("unknown chat op: {op}"))),
    }
}

// =============================================================================
// SCOPE HANDLERS
// =============================================================================

async fn handle_scope(state: &AppState, conn_id: Uuid, req: &Frame) -> Result<Outcome, Frame> {
    let scope_id = require_uuid(req, "scope_id")?;

    match req.op() {
        "subscribe" => {
            broker::subscribe(state, conn_id, scope_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Done)
        }
        "unsubscribe" => {
            broker::unsubscribe(state, conn_id, scope_id);
            Ok(Outcome::Done)
        }
        op => Err(req.error(format!("unknown scope op: {op}"))),
    }
}

// =============================================================================
// NOTIFICATION HANDLERS
// =============================================================================

async fn handle_notification(state: &AppState, user_id: Uuid, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "list" => {
            let list = notify::list_notifications(state, user_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(reply_with("notifications", &list))
        }
        "read" => {
            let id = require_uuid(req, "notification_id")?;
            let notification = notify::mark_read(state, id, user_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(reply_with("notification", &notification))
        }
        op => Err(req.error(format!("unknown notification op: {op}"))),
    }
}

// =============================================================================
// COMPLAINT HANDLERS
// =============================================================================

async fn handle_complaint(state: &AppState, user_id: Uuid, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "create" => {
            let input: complaint::NewComplaint = parse_data(req)?;
            let created = complaint::create_complaint(state, user_id, input)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(reply_with("complaint", &created))
        }
        "list" => {
            let list = complaint::list_complaints(state, user_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(reply_with("complaints", &list))
        }
        "review" => {
            let complaint_id = require_uuid(req, "complaint_id")?;
            let review: complaint::ComplaintReview = parse_data(req)?;
            let updated = complaint::review_complaint(state, user_id, complaint_id, review)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(reply_with("complaint", &updated))
        }
        op => Err(req.error(format!("unknown complaint op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn reply_with(key: &str, value: &impl Serialize) -> Outcome {
    let mut data = Data::new();
    data.insert(key.into(), serde_json::to_value(value).unwrap_or_default());
    Outcome::Reply(data)
}

fn require_uuid(req: &Frame, key: &str) -> Result<Uuid, Frame> {
    req.uuid_field(key)
        .or_else(|| if key == "scope_id" { None } else { req.scope_id })
        .ok_or_else(|| req.error_from(&CoreError::validation(format!("{key} required"))))
}

fn parse_data<T: DeserializeOwned>(req: &Frame) -> Result<T, Frame> {
    serde_json::to_value(&req.data)
        .and_then(serde_json::from_value)
        .map_err(|e| req.error_from(&CoreError::validation(e.to_string())))
}

/// `data.rating`: absent or null means no rating.
fn rating_field(req: &Frame) -> Result<Option<u8>, Frame> {
    match req.data.get("rating") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| req.error_from(&CoreError::validation("rating must be 1-5"))),
    }
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
