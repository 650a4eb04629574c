use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub slots: SlotsConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Config {
    /// Load config from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidInput(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| Error::Parsing(format!("{}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Bearer token required on API calls. `None` = dev mode, no auth.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            api_key: None,
            cors_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing thresholds & bonuses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Starting value of the session-dynamic confidence floor.
    #[serde(default = "d_065")]
    pub default_confidence_threshold: f32,
    /// Score above which a single keyword match wins outright.
    #[serde(default = "d_085")]
    pub high_confidence_threshold: f32,
    /// Floor after two consecutive no-match turns.
    #[serde(default = "d_05")]
    pub min_confidence_threshold: f32,
    /// Floor after a negative-feedback signal.
    #[serde(default = "d_08")]
    pub max_confidence_threshold: f32,
    /// Additive bonus for the previous turn's handler in the semantic stage.
    #[serde(default = "d_015")]
    pub continuity_bonus: f32,
    /// Weight of the prior-turn similarity bonus in the semantic stage.
    #[serde(default = "d_02")]
    pub semantic_relevance_weight: f32,
    /// Subtracted from the previous handler's score after negative feedback.
    #[serde(default = "d_01")]
    pub negative_feedback_penalty: f32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_confidence_threshold: 0.65,
            high_confidence_threshold: 0.85,
            min_confidence_threshold: 0.5,
            max_confidence_threshold: 0.8,
            continuity_bonus: 0.15,
            semantic_relevance_weight: 0.2,
            negative_feedback_penalty: 0.1,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slot collection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotsConfig {
    /// Collection turns a single handler turn may span before handoff.
    #[serde(default = "d_5")]
    pub max_collection_turns: u32,
    /// Default validation attempts per slot before handoff.
    #[serde(default = "d_3")]
    pub slot_max_attempts: u32,
}

impl Default for SlotsConfig {
    fn default() -> Self {
        Self {
            max_collection_turns: 5,
            slot_max_attempts: 3,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor deadlines
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Turn deadline in seconds when no per-handler override exists.
    #[serde(default = "d_20")]
    pub default_timeout_s: u64,
    /// Per-handler deadline overrides, keyed by handler name.
    #[serde(default)]
    pub per_handler_timeout_s: HashMap<String, u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_s: 20,
            per_handler_timeout_s: HashMap::new(),
        }
    }
}

impl ExecutorConfig {
    /// Resolve the deadline for a handler name.
    pub fn timeout_for(&self, handler_name: &str) -> std::time::Duration {
        let secs = self
            .per_handler_timeout_s
            .get(handler_name)
            .copied()
            .unwrap_or(self.default_timeout_s);
        std::time::Duration::from_secs(secs)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session lifecycle & checkpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Days of inactivity before a session is evicted.
    #[serde(default = "d_7")]
    pub state_expiration_days: u32,
    /// Named checkpoints kept per session; oldest evicted on overflow.
    #[serde(default = "d_5")]
    pub max_checkpoints_per_session: u32,
    /// When true, an unreachable storage backend is a fatal startup error.
    #[serde(default)]
    pub require_persistence: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            state_expiration_days: 7,
            max_checkpoints_per_session: 5,
            require_persistence: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM / embedding providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "d_llm_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "d_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_02")]
    pub temperature: f32,
    #[serde(default = "d_8000")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: d_llm_endpoint(),
            model: d_llm_model(),
            api_key_env: d_llm_key_env(),
            temperature: 0.2,
            timeout_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "d_embed_endpoint")]
    pub endpoint: String,
    #[serde(default = "d_embed_model")]
    pub model: String,
    /// Process-wide embedding cache capacity (LRU).
    #[serde(default = "d_1000")]
    pub embedding_cache_size: usize,
    #[serde(default = "d_2000u")]
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: d_embed_endpoint(),
            model: d_embed_model(),
            embedding_cache_size: 1000,
            timeout_ms: 2000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backpressure
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Requests in flight across all sessions before shedding load.
    #[serde(default = "d_256")]
    pub global_inflight_limit: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            global_inflight_limit: 256,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Default helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    3400
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:3400".into()]
}
fn d_llm_endpoint() -> String {
    "https://api.openai.com/v1".into()
}
fn d_llm_model() -> String {
    "gpt-4o-mini".into()
}
fn d_llm_key_env() -> String {
    "SWITCHBOARD_LLM_API_KEY".into()
}
fn d_embed_endpoint() -> String {
    "http://localhost:11434".into()
}
fn d_embed_model() -> String {
    "nomic-embed-text".into()
}
fn d_065() -> f32 {
    0.65
}
fn d_085() -> f32 {
    0.85
}
fn d_05() -> f32 {
    0.5
}
fn d_08() -> f32 {
    0.8
}
fn d_015() -> f32 {
    0.15
}
fn d_02() -> f32 {
    0.2
}
fn d_01() -> f32 {
    0.1
}
fn d_3() -> u32 {
    3
}
fn d_5() -> u32 {
    5
}
fn d_7() -> u32 {
    7
}
fn d_20() -> u64 {
    20
}
fn d_256() -> usize {
    256
}
fn d_1000() -> usize {
    1000
}
fn d_8000() -> u64 {
    8000
}
fn d_2000u() -> u64 {
    2000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recognized_options() {
        let cfg = Config::default();
        assert_eq!(cfg.routing.default_confidence_threshold, 0.65);
        assert_eq!(cfg.routing.high_confidence_threshold, 0.85);
        assert_eq!(cfg.routing.min_confidence_threshold, 0.5);
        assert_eq!(cfg.routing.max_confidence_threshold, 0.8);
        assert_eq!(cfg.routing.continuity_bonus, 0.15);
        assert_eq!(cfg.routing.semantic_relevance_weight, 0.2);
        assert_eq!(cfg.slots.max_collection_turns, 5);
        assert_eq!(cfg.slots.slot_max_attempts, 3);
        assert_eq!(cfg.executor.default_timeout_s, 20);
        assert_eq!(cfg.embedding.embedding_cache_size, 1000);
        assert_eq!(cfg.sessions.state_expiration_days, 7);
        assert_eq!(cfg.sessions.max_checkpoints_per_session, 5);
        assert_eq!(cfg.limits.global_inflight_limit, 256);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [routing]
            continuity_bonus = 0.25

            [executor]
            default_timeout_s = 30

            [executor.per_handler_timeout_s]
            PackageTracking = 45
            "#,
        )
        .unwrap();

        assert_eq!(cfg.routing.continuity_bonus, 0.25);
        assert_eq!(cfg.routing.default_confidence_threshold, 0.65);
        assert_eq!(
            cfg.executor.timeout_for("PackageTracking"),
            std::time::Duration::from_secs(45)
        );
        assert_eq!(
            cfg.executor.timeout_for("StoreLocator"),
            std::time::Duration::from_secs(30)
        );
    }

    #[test]
    fn timeout_for_falls_back_to_default() {
        let cfg = ExecutorConfig::default();
        assert_eq!(
            cfg.timeout_for("anything"),
            std::time::Duration::from_secs(20)
        );
    }
}
