use std::sync::Arc;

use sw_domain::config::Config;
use sw_handlers::HandlerRegistry;
use sw_orchestrator::{Orchestrator, TraceStore};
use sw_providers::EmbeddingProvider;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<HandlerRegistry>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub traces: Arc<TraceStore>,
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode, no auth enforced.
    pub api_token_hash: Option<Vec<u8>>,
}
