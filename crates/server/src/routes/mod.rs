pub mod admin;
pub mod details;
pub mod health;
pub mod search;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// Root route: service identity and the endpoint map.
pub async fn api_info() -> impl IntoResponse {
    Json(json!({
        "service": "kpath",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "search": "/api/v1/search",
            "similar": "/api/v1/search/similar/{service_id}",
            "tool_details": "/api/v1/search/tools/{tool_id}/{details|schema|examples|summary}",
            "status": "/api/v1/search/status",
            "health": "/health",
        }
    }))
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "code": "NotFound",
            "message": "no such route",
            "retryable": false,
        })),
    )
}
