use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use crate::state::ServerState;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness follows the index lifecycle: serving traffic before the
/// first build completes would only produce `IndexNotReady` errors.
pub async fn readiness_check(State(state): State<Arc<ServerState>>) -> Response {
    let status = state.stack.manager.status();
    let code = if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(json!({"ready": state.is_ready(), "state": status.state}))).into_response()
}

pub async fn metrics(State(state): State<Arc<ServerState>>) -> Response {
    if !state.config.metrics_enabled {
        return (StatusCode::NOT_FOUND, "metrics disabled").into_response();
    }
    match ServerState::prometheus() {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "recorder unavailable").into_response(),
    }
}
