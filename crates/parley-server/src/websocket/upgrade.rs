//! `GET /ws`: authenticate, then upgrade and attach to the hub.

use std::collections::HashMap;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::auth::{extract_credential, AuthError};
use crate::server::AppState;

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = extract_credential(&headers, &query) else {
        return reject(&AuthError::MissingCredentials);
    };
    let user_id = match state.auth.authenticate(&token).await {
        Ok(user_id) => user_id,
        Err(e) => return reject(&e),
    };

    debug!(user_id = %user_id, "upgrade authenticated");
    let hub = state.hub.clone();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            hub.attach(user_id, socket).join().await;
        })
}

fn reject(err: &AuthError) -> Response {
    let status = match err {
        AuthError::MissingCredentials | AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        AuthError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    warn!(error = %err, status = status.as_u16(), "websocket upgrade rejected");
    (status, err.to_string()).into_response()
}
