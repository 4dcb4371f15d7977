//! Banner, health, and metrics

use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::AppState;

/// GET /
pub async fn banner() -> Json<Value> {
    Json(json!({
        "service": "hold-invoice-service",
        "version": crate::VERSION,
    }))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "backend": state.api.node_backend(),
    }))
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "lifecycle": state.api.metrics(),
        "http": state.metrics.to_json(),
    }))
}
