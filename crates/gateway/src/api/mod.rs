pub mod auth;
pub mod handlers;
pub mod health;
pub mod process;
pub mod sessions;
pub mod traces;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// `/healthz` is public; everything else sits behind the bearer-token
/// middleware (a no-op in dev mode, when no API key is configured).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/healthz", get(health::healthz));

    let protected = Router::new()
        .route("/v1/process", post(process::process))
        .route("/v1/handlers", post(handlers::register))
        .route("/v1/handlers", get(handlers::list))
        .route("/v1/handlers/:id", delete(handlers::remove))
        .route("/v1/sessions/:id", get(sessions::get_state))
        .route("/v1/sessions/:id/checkpoints", get(sessions::list_checkpoints))
        .route("/v1/sessions/:id/rollback", post(sessions::rollback))
        .route("/v1/traces", get(traces::recent))
        .layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}
