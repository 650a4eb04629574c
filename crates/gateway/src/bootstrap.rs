//! Startup wiring: providers, storage, registry, orchestrator.

use std::sync::Arc;

use anyhow::{bail, Context};
use serde_json::json;

use sw_domain::config::Config;
use sw_handlers::{seed, HandlerRegistry};
use sw_orchestrator::Orchestrator;
use sw_providers::http::{OllamaEmbedder, OpenAiCompatLlm};
use sw_providers::{EmbeddingProvider, LlmProvider};
use sw_sessions::{MemoryBackend, StateBackend};
use sw_tools::{StaticJsonTool, ToolRegistry};

use crate::api::auth::token_hash;
use crate::state::AppState;

/// Embedding dimensionality of the default embedding model.
const EMBEDDING_DIMS: usize = 768;

/// Build the full application state.
///
/// Fails (exit code 1 upstream) when LLM credentials are missing or the
/// storage backend is unreachable with `require_persistence` set.
pub async fn build_app_state(config: Arc<Config>, seed_builtins: bool) -> anyhow::Result<AppState> {
    // ── Providers ─────────────────────────────────────────────────
    let api_key = std::env::var(&config.llm.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty());
    let Some(api_key) = api_key else {
        bail!(
            "missing LLM credentials: set {} to the provider API key",
            config.llm.api_key_env
        );
    };
    let llm: Arc<dyn LlmProvider> = Arc::new(
        OpenAiCompatLlm::new(&config.llm, api_key).context("building LLM provider")?,
    );
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
        OllamaEmbedder::new(&config.embedding, EMBEDDING_DIMS)
            .context("building embedding provider")?,
    );

    // ── Storage ───────────────────────────────────────────────────
    let backend: Arc<dyn StateBackend> = Arc::new(MemoryBackend::new(
        config.sessions.max_checkpoints_per_session as usize,
    ));
    if config.sessions.require_persistence && !backend.ping().await {
        bail!("storage backend unreachable and require_persistence is set");
    }

    // ── Handlers & tools ──────────────────────────────────────────
    let registry = Arc::new(HandlerRegistry::new());
    let tools = Arc::new(ToolRegistry::new());
    if seed_builtins {
        for def in seed::all() {
            let name = def.name.clone();
            registry
                .register(def, embedder.as_ref())
                .await
                .with_context(|| format!("registering built-in handler {name}"))?;
        }
        register_demo_tools(&tools);
        tracing::info!(handlers = registry.len(), "built-in handlers registered");
    }

    // ── Core ──────────────────────────────────────────────────────
    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        registry.clone(),
        backend,
        llm,
        embedder.clone(),
        tools,
    ));

    let api_token_hash = config
        .server
        .api_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .map(token_hash);
    if api_token_hash.is_none() {
        tracing::warn!("no API key configured; serving unauthenticated (dev mode)");
    }

    Ok(AppState {
        config,
        traces: orchestrator.traces(),
        registry,
        embedder,
        orchestrator,
        api_token_hash,
    })
}

/// Canned fixtures behind the built-in handlers' declared tools.
fn register_demo_tools(tools: &ToolRegistry) {
    tools.register(Arc::new(StaticJsonTool::new(
        "track_order",
        json!({ "status": "in transit", "eta": "within 2 business days" }),
    )));
    tools.register(Arc::new(StaticJsonTool::new(
        "find_store",
        json!({
            "name": "Downtown Crossing",
            "address": "1 Washington St",
            "closes": "9pm"
        }),
    )));
}

/// Periodic maintenance: evict expired sessions, drop idle locks.
pub fn spawn_sweeper(orchestrator: Arc<Orchestrator>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        interval.tick().await; // immediate first tick
        loop {
            interval.tick().await;
            match orchestrator.evict_expired_sessions().await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "session sweep complete");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "session sweep failed"),
            }
            orchestrator.prune_session_locks();
        }
    });
}
