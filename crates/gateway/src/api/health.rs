//! Liveness/readiness probe.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    let storage = state.orchestrator.storage_healthy().await;
    Json(json!({
        "status": if storage { "ok" } else { "degraded" },
        "storage": storage,
        "handlers": state.registry.len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
