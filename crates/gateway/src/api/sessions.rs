//! Session state inspection and checkpoint rollback.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

pub async fn get_state(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let conversation = state.orchestrator.store().resilient_recover(&id, None).await;
    if conversation.messages.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no session '{id}'") })),
        )
            .into_response();
    }
    Json(json!({
        "session_id": conversation.session_id,
        "messages": conversation.messages,
        "last_handler": conversation.last_handler,
        "working_memory": conversation.working_memory,
        "current_turn": conversation.current_turn,
        "checkpoints": conversation.checkpoints,
        "persistence_flags": conversation.persistence_flags,
    }))
    .into_response()
}

pub async fn list_checkpoints(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.orchestrator.store().list_checkpoints(&id).await {
        Ok(checkpoints) => Json(json!({ "checkpoints": checkpoints })).into_response(),
        Err(e) => storage_error(e),
    }
}

#[derive(Deserialize, Default)]
pub struct RollbackRequest {
    /// Checkpoint to restore; the most recent one when absent.
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn rollback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RollbackRequest>,
) -> Response {
    match state
        .orchestrator
        .store()
        .rollback(&id, req.name.as_deref())
        .await
    {
        Ok(Some(restored)) => Json(json!({
            "session_id": restored.session_id,
            "messages": restored.messages.len(),
            "restored": true,
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no matching checkpoint" })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

fn storage_error(e: sw_domain::Error) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": e.to_string(), "error_type": e.kind().as_str() })),
    )
        .into_response()
}
