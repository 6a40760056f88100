use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// API index banner.
pub async fn index() -> impl IntoResponse {
    Json(json!({
        "status": "success",
        "message": "You successfully reached the courier API."
    }))
}

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
