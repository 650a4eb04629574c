//! Handler registration and catalog routes.
//!
//! Registration consumes the declarative `HandlerDefinition` JSON schema;
//! unknown fields and duplicate names are rejected with 400s.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use sw_handlers::HandlerDefinition;

use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    Json(def): Json<HandlerDefinition>,
) -> Response {
    match state
        .registry
        .register(def, state.embedder.as_ref())
        .await
    {
        Ok(id) => (StatusCode::CREATED, Json(json!({ "id": id }))).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string(), "error_type": e.kind().as_str() })),
        )
            .into_response(),
    }
}

pub async fn list(State(state): State<AppState>) -> Json<serde_json::Value> {
    let handlers: Vec<serde_json::Value> = state
        .registry
        .all()
        .iter()
        .map(|h| {
            json!({
                "id": h.def.id,
                "name": h.def.name,
                "description": h.def.description,
                "slots": h.def.slots.len(),
                "tools": h.def.tools.iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
                "confidence_floor": h.def.confidence_floor,
            })
        })
        .collect();
    Json(json!({ "handlers": handlers }))
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    if state.registry.remove(&id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no handler with id {id}") })),
        )
            .into_response()
    }
}
