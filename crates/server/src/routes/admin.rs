use axum::extract::State;
use axum::Json;
use search::SearchStatus;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::state::ServerState;

/// `GET /status`: the manager's build state and index counts.
pub async fn status(State(state): State<Arc<ServerState>>) -> Json<SearchStatus> {
    Json(state.stack.manager.status())
}

/// `POST /rebuild`: trigger a full background rebuild. Responds
/// immediately; concurrent requests coalesce onto the in-flight build.
pub async fn rebuild(State(state): State<Arc<ServerState>>) -> Json<Value> {
    let manager = state.stack.manager.clone();
    tokio::spawn(async move {
        if let Err(e) = manager.build_all().await {
            tracing::error!(error = %e, "admin-triggered rebuild failed");
        }
    });
    Json(json!({"accepted": true}))
}

/// `POST /initialize`: snapshot load with background build fallback, same
/// path the server runs at startup.
pub async fn initialize(State(state): State<Arc<ServerState>>) -> Json<Value> {
    state.initialize();
    Json(json!({"accepted": true}))
}
