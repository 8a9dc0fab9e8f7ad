//! Chat streaming and relay stats handlers

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{KeepAlive, Sse},
    },
    routing::{get, post},
};
use std::sync::Arc;

use crate::relay::{ChatStreamRequest, RelayStatsSnapshot, relay_to_sse};

use super::{AppState, create_error_response};

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stream", post(chat_stream_handler))
        .route("/stats", get(stats_handler))
}

/// Start a relay session and stream it back as SSE
///
/// Validation failures are answered with a JSON 400 before any session
/// exists. Once streaming starts, errors arrive as `error` events.
async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatStreamRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!("Rejected chat request body: {}", rejection.body_text());
            return create_error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &rejection.body_text(),
            );
        }
    };

    let request = match body.into_generation_request(&state.config.chat) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Rejected chat request: {e}");
            return create_error_response(StatusCode::BAD_REQUEST, "invalid_request", &e.to_string());
        }
    };

    let relay = state.pipeline.start(request, state.shutdown.child_token());
    tracing::debug!(session_id = %relay.session_id(), "Streaming relay session");

    let mut response = Sse::new(relay_to_sse(relay))
        .keep_alive(KeepAlive::default())
        .into_response();

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Cache-Control"),
    );

    response
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<RelayStatsSnapshot> {
    Json(state.pipeline.stats().snapshot())
}
