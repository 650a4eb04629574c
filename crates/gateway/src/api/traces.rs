//! Recent request traces, for debugging routing and turn execution.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

#[derive(Deserialize, Default)]
pub struct TracesQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn recent(
    State(state): State<AppState>,
    Query(query): Query<TracesQuery>,
) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(20).min(100);
    Json(json!({ "traces": state.traces.recent(limit) }))
}
