//! The single entry point that glues safety, routing, execution and
//! persistence together.
//!
//! `process` is the whole request lifecycle: admit (backpressure), lock
//! the session, recover state, pre-filter, route or resume, execute the
//! turn under its deadline, persist, and translate any failure into a
//! deterministic user message. The response envelope never carries an
//! internal error; failures are recorded as structured entries instead.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use sw_domain::config::Config;
use sw_domain::error::Error;
use sw_domain::message::Message;
use sw_domain::retry::{with_timeout, RetryPolicy};
use sw_domain::trace::TraceEvent;
use sw_domain::ErrorKind;
use sw_handlers::HandlerRegistry;
use sw_providers::{EmbeddingCache, EmbeddingProvider, LlmProvider};
use sw_router::special::canned_reply;
use sw_router::{RouteDecision, RouteMethod, Router, WM_CURRENT_TOPIC};
use sw_safety::SafetyFilter;
use sw_sessions::{ConversationState, ExitReason, SessionStore, StateBackend};
use sw_tools::ToolRegistry;

use crate::executor::TurnExecutor;
use crate::messages;
use crate::session_lock::{InflightGate, SessionLockMap};
use crate::telemetry::{RecordedError, RequestTrace, TraceNodeKind, TraceStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response envelopes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub intent_confidence: Option<f32>,
    /// When naming a registered handler, pins routing for this turn only.
    #[serde(default)]
    pub agent_hint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub context: Option<RequestContext>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessResponse {
    pub success: bool,
    pub response: String,
    /// Name of the handler that served the turn; empty when none did.
    pub handler: String,
    pub confidence: f32,
    pub session_id: String,
    pub execution_time_s: f64,
    pub execution_path: Vec<String>,
    pub entities: BTreeMap<String, String>,
    pub tools_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<RecordedError>>,
}

/// Internal result of the branching part of `process`, before the shared
/// bookkeeping and envelope assembly.
struct TurnResult {
    response: String,
    handler_name: String,
    confidence: f32,
    entities: Vec<(String, String)>,
    tools_used: Vec<String>,
    exit_reason: Option<ExitReason>,
    /// Set when a handler turn completed: triggers Done bookkeeping
    /// (clear turn, set last handler and topic, checkpoint).
    completed_handler: Option<Uuid>,
}

impl TurnResult {
    fn plain(response: impl Into<String>, confidence: f32) -> Self {
        Self {
            response: response.into(),
            handler_name: String::new(),
            confidence,
            entities: Vec::new(),
            tools_used: Vec::new(),
            exit_reason: None,
            completed_handler: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    config: Arc<Config>,
    registry: Arc<HandlerRegistry>,
    router: Router,
    executor: TurnExecutor,
    store: SessionStore,
    safety: Arc<SafetyFilter>,
    locks: SessionLockMap,
    gate: InflightGate,
    traces: Arc<TraceStore>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<HandlerRegistry>,
        backend: Arc<dyn StateBackend>,
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let cache = Arc::new(EmbeddingCache::new(config.embedding.embedding_cache_size));
        let safety = Arc::new(SafetyFilter::new());
        let router = Router::new(
            config.routing.clone(),
            registry.clone(),
            embedder,
            cache,
        );
        let executor = TurnExecutor::new(llm, tools, safety.clone(), config.slots.clone());
        let store = SessionStore::new(
            backend,
            config.sessions.max_checkpoints_per_session as usize,
        );
        let gate = InflightGate::new(config.limits.global_inflight_limit);

        Self {
            config,
            registry,
            router,
            executor,
            store,
            safety,
            locks: SessionLockMap::new(),
            gate,
            traces: Arc::new(TraceStore::new(256)),
        }
    }

    /// Shrink retry delays (tests).
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.store = self.store.with_policy(policy.clone());
        self.executor = self.executor.with_retry_policy(policy);
        self
    }

    pub fn traces(&self) -> Arc<TraceStore> {
        self.traces.clone()
    }

    pub fn registry(&self) -> Arc<HandlerRegistry> {
        self.registry.clone()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ── process ────────────────────────────────────────────────────

    pub async fn process(&self, req: ProcessRequest) -> ProcessResponse {
        let started = Instant::now();

        let Some(_admit) = self.gate.try_admit() else {
            return ProcessResponse {
                success: false,
                response: messages::OVERLOADED.to_owned(),
                handler: String::new(),
                confidence: 0.0,
                session_id: req.session_id.unwrap_or_default(),
                execution_time_s: started.elapsed().as_secs_f64(),
                execution_path: Vec::new(),
                entities: BTreeMap::new(),
                tools_used: Vec::new(),
                exit_reason: None,
                errors: None,
            };
        };

        let session_id = req
            .session_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Same-session messages execute in arrival order.
        let _lock = self.locks.acquire(&session_id).await;

        let deadline =
            started + Duration::from_secs(self.config.executor.default_timeout_s);
        let mut trace = RequestTrace::begin(&session_id, &req.message);

        TraceEvent::RequestReceived {
            session_id: session_id.clone(),
            message_chars: req.message.chars().count(),
        }
        .emit();

        // 1. Recover state (pending-checkpoint drain happens on persist).
        let mut state = self.store.resilient_recover(&session_id, Some(deadline)).await;
        state.push_message(Message::user(&req.message));

        // 2. Input pre-filter.
        let input_started = Utc::now();
        let verdict = self.safety.input_pass(&req.message);
        trace.push_node(
            TraceNodeKind::InputCheck,
            "input_check",
            input_started,
            json!({ "out_of_scope": verdict.out_of_scope, "category": verdict.category }),
            false,
        );

        // 3–4. Route (or resume) and execute.
        let agent_hint = req
            .context
            .as_ref()
            .and_then(|c| c.agent_hint.as_deref());
        let result = self
            .execute_message(&mut state, &req.message, &verdict, agent_hint, deadline, &mut trace)
            .await;

        // Done bookkeeping for completed handler turns.
        if let Some(handler_id) = result.completed_handler {
            state.current_turn = None;
            state.last_handler = Some(handler_id);
            state.remember(WM_CURRENT_TOPIC, json!(req.message));
        }

        // Every turn appends exactly one assistant message.
        let assistant = if result.handler_name.is_empty() {
            Message::assistant(&result.response)
        } else {
            Message::assistant(&result.response).from_agent(&result.handler_name)
        };
        state.push_message(assistant);

        // 5. Checkpoint completed turns, then persist.
        if result.completed_handler.is_some() {
            let n = state.message_count() / 2;
            self.store
                .resilient_checkpoint(&format!("interaction_{n}"), &mut state, Some(deadline))
                .await;
        }
        let persist_started = Utc::now();
        let state = self.store.resilient_persist(state, Some(deadline)).await;
        trace.push_node(
            TraceNodeKind::Persistence,
            "persist",
            persist_started,
            json!({ "dirty": state.persistence_flags.dirty }),
            state.persistence_flags.dirty,
        );

        // 6. Envelope.
        trace.finish(&result.response);
        let response = ProcessResponse {
            success: true,
            response: result.response,
            handler: result.handler_name,
            confidence: result.confidence,
            session_id,
            execution_time_s: started.elapsed().as_secs_f64(),
            execution_path: trace.execution_path(),
            entities: result.entities.into_iter().collect(),
            tools_used: result.tools_used,
            exit_reason: result.exit_reason.map(|r| r.to_string()),
            errors: (!trace.errors.is_empty()).then(|| trace.errors.clone()),
        };
        self.traces.insert(trace);
        response
    }

    /// The branching middle of `process`: route or resume, run the turn,
    /// translate failures.
    async fn execute_message(
        &self,
        state: &mut ConversationState,
        message: &str,
        verdict: &sw_safety::InputVerdict,
        agent_hint: Option<&str>,
        deadline: Instant,
        trace: &mut RequestTrace,
    ) -> TurnResult {
        // Routing is skipped while a turn is suspended: the selection is
        // final until the turn completes.
        let decision = if let Some(turn) = &state.current_turn {
            RouteDecision {
                handler_id: Some(turn.handler_id),
                handler_name: Some(turn.handler_name.clone()),
                confidence: 0.75,
                reason: "resuming_turn".to_owned(),
                method: RouteMethod::Continuity,
                special: None,
            }
        } else {
            let route_started = Utc::now();
            match self.router.route(message, state, agent_hint).await {
                Ok(decision) => {
                    trace.push_node(
                        TraceNodeKind::RouteDecision,
                        "router",
                        route_started,
                        json!({
                            "handler": decision.handler_name,
                            "confidence": decision.confidence,
                            "method": decision.method,
                            "reason": decision.reason,
                        }),
                        false,
                    );
                    decision
                }
                Err(e) => {
                    trace.record_error("router", &e);
                    return TurnResult::plain(messages::user_message_for(e.kind()), 0.0);
                }
            }
        };

        // Special-case short-circuit: canned reply, no handler involved,
        // `last_handler` untouched.
        if let Some(case) = decision.special {
            return TurnResult::plain(canned_reply(case.category, message), 1.0);
        }

        let Some(handler_id) = decision.handler_id else {
            let response = if verdict.out_of_scope {
                messages::OUT_OF_SCOPE_REDIRECT
            } else {
                match decision.reason.as_str() {
                    "no_handlers" => messages::FALLBACK_NO_HANDLERS,
                    "empty" => messages::user_message_for(ErrorKind::InvalidInput),
                    _ => messages::FALLBACK_NO_MATCH,
                }
            };
            return TurnResult::plain(response, decision.confidence);
        };

        let Some(handler) = self.registry.get(&handler_id) else {
            let e = Error::HandlerNotFound(handler_id.to_string());
            trace.record_error("router", &e);
            return TurnResult::plain(messages::user_message_for(e.kind()), 0.0);
        };

        // The turn runs under the tighter of the per-handler deadline and
        // what remains of the request deadline.
        let handler_timeout = self.config.executor.timeout_for(&handler.def.name);
        let remaining = deadline.saturating_duration_since(Instant::now());
        let turn_deadline = handler_timeout.min(remaining.max(Duration::from_millis(1)));

        let exec_started = Utc::now();
        let outcome = with_timeout(
            turn_deadline,
            self.executor
                .run_turn(&handler, state, message, verdict, trace),
        )
        .await;

        match outcome {
            Ok(outcome) => {
                trace.push_node(
                    TraceNodeKind::HandlerCall,
                    &handler.def.name,
                    exec_started,
                    json!({ "suspended": outcome.suspended }),
                    false,
                );
                if !outcome.suspended {
                    TraceEvent::TurnCompleted {
                        session_id: state.session_id.clone(),
                        handler: handler.def.name.clone(),
                        exit_reason: outcome
                            .exit_reason
                            .as_ref()
                            .map(|r| r.to_string())
                            .unwrap_or_default(),
                        duration_ms: (Utc::now() - exec_started).num_milliseconds().max(0)
                            as u64,
                    }
                    .emit();
                }
                TurnResult {
                    response: outcome.response,
                    handler_name: handler.def.name.clone(),
                    confidence: decision.confidence,
                    entities: outcome.entities,
                    tools_used: outcome.tools_used,
                    exit_reason: outcome.exit_reason.clone(),
                    completed_handler: (!outcome.suspended).then_some(handler_id),
                }
            }
            Err(e) => {
                trace.push_node(
                    TraceNodeKind::HandlerCall,
                    &handler.def.name,
                    exec_started,
                    json!({ "error": e.kind().as_str() }),
                    true,
                );
                trace.record_error("executor", &e);

                let timed_out = e.kind() == ErrorKind::HandlerTimeout;
                // The turn is dead either way: the next user message must
                // not re-enter it.
                let entities = state
                    .current_turn
                    .take()
                    .map(|t| sw_handlers::slots::collected_values(&t.slot_states))
                    .unwrap_or_default();

                TurnResult {
                    response: messages::user_message_for(e.kind()).to_owned(),
                    handler_name: handler.def.name.clone(),
                    confidence: decision.confidence,
                    entities,
                    tools_used: Vec::new(),
                    exit_reason: timed_out.then_some(ExitReason::Timeout),
                    completed_handler: Some(handler_id),
                }
            }
        }
    }

    // ── maintenance ────────────────────────────────────────────────

    /// Evict sessions idle past the configured expiration.
    pub async fn evict_expired_sessions(&self) -> sw_domain::Result<usize> {
        self.store
            .clean_expired(self.config.sessions.state_expiration_days)
            .await
    }

    /// Storage health, for readiness probes and startup checks.
    pub async fn storage_healthy(&self) -> bool {
        self.store.ping().await
    }

    /// Drop idle per-session locks (periodic maintenance).
    pub fn prune_session_locks(&self) {
        self.locks.prune_idle();
    }
}
