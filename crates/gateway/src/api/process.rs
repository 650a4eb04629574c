//! The primary endpoint: one user message in, one core response out.

use axum::extract::State;
use axum::Json;

use sw_orchestrator::{ProcessRequest, ProcessResponse};

use crate::state::AppState;

pub async fn process(
    State(state): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> Json<ProcessResponse> {
    Json(state.orchestrator.process(req).await)
}
