use super::*;
use axum::extract::FromRequestParts;
use axum::http::Request;
use axum::http::header::COOKIE;

use crate::domain::Role;
use crate::state::test_helpers;

fn parts_with_cookie(cookie: Option<&str>) -> axum::http::request::Parts {
    let mut builder = Request::builder().uri("/api/requests");
    if let Some(c) = cookie {
        builder = builder.header(COOKIE, c);
    }
    builder.body(()).unwrap().into_parts().0
}

#[tokio::test]
async fn missing_cookie_is_unauthorized() {
    let state = test_helpers::test_app_state();
    let mut parts = parts_with_cookie(None);
    let result = AuthUser::from_request_parts(&mut parts, &state).await;
    assert_eq!(result.err(), Some(StatusCode::UNAUTHORIZED));
}

#[tokio::test]
async fn unknown_token_is_unauthorized() {
    let state = test_helpers::test_app_state();
    let mut parts = parts_with_cookie(Some("session_token=deadbeef"));
    let result = AuthUser::from_request_parts(&mut parts, &state).await;
    assert_eq!(result.err(), Some(StatusCode::UNAUTHORIZED));
}

#[tokio::test]
async fn valid_session_resolves_user() {
    let (state, sessions) = test_helpers::test_app_state_with_sessions();
    let user = test_helpers::seed_user(&state, Role::Customer).await;
    let token = sessions.grant(user.id);

    let mut parts = parts_with_cookie(Some(&format!("other=1; {COOKIE_NAME}={token}")));
    let auth = AuthUser::from_request_parts(&mut parts, &state).await.ok().unwrap();

    assert_eq!(auth.user_id, user.id);
    assert_eq!(auth.token, token);
}

#[tokio::test]
async fn ws_ticket_is_consumable_once() {
    let (state, sessions) = test_helpers::test_app_state_with_sessions();
    let user = test_helpers::seed_user(&state, Role::Provider).await;
    let token = sessions.grant(user.id);

    let Json(body) = ws_ticket(State(state.clone()), AuthUser { user_id: user.id, token }).await.unwrap();
    let ticket = body["ticket"].as_str().unwrap().to_string();

    assert_eq!(state.auth.consume_ws_ticket(&ticket).await.unwrap(), Some(user.id));
    assert_eq!(state.auth.consume_ws_ticket(&ticket).await.unwrap(), None);
}
