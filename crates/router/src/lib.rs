//! The four-stage routing pipeline.
//!
//! A message is routed by, in order: special-case classification
//! (greetings, farewells, transfer requests, negative feedback),
//! conversation continuity with the previous turn's handler, a cheap
//! keyword prefilter, and finally semantic ranking over handler
//! embeddings. The first stage to produce a decision wins; every decision
//! that names a handler must clear the effective confidence floor.

pub mod floor;
pub mod keyword;
pub mod special;

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use sw_domain::config::RoutingConfig;
use sw_domain::error::Result;
use sw_domain::trace::TraceEvent;
use sw_handlers::{HandlerRegistry, IndexedHandler};
use sw_providers::{cosine_similarity, EmbeddingCache, EmbeddingProvider};
use sw_sessions::ConversationState;

use keyword::{KeywordOutcome, KeywordScore};
use special::{SpecialCase, SpecialCaseClassifier, SpecialCategory};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Working-memory keys
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const WM_CURRENT_TOPIC: &str = "current_topic";
pub const WM_NO_MATCH_STREAK: &str = "no_match_streak";
pub const WM_NEGATIVE_FEEDBACK: &str = "negative_feedback";
pub const WM_HUMAN_TRANSFER: &str = "human_transfer_requested";
pub const WM_CONTINUE_SAME: &str = "continue_with_same_agent";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMethod {
    Special,
    Continuity,
    Keyword,
    Semantic,
    None,
}

/// The router's answer for one message.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub handler_id: Option<Uuid>,
    pub handler_name: Option<String>,
    pub confidence: f32,
    pub reason: String,
    pub method: RouteMethod,
    /// Set on special-case short-circuits so the executor can produce the
    /// canned reply for the category.
    pub special: Option<SpecialCase>,
}

impl RouteDecision {
    fn none(confidence: f32, reason: impl Into<String>) -> Self {
        Self {
            handler_id: None,
            handler_name: None,
            confidence,
            reason: reason.into(),
            method: RouteMethod::None,
            special: None,
        }
    }

    fn special(case: SpecialCase) -> Self {
        Self {
            handler_id: None,
            handler_name: None,
            confidence: 1.0,
            reason: case.category.as_str().to_owned(),
            method: RouteMethod::Special,
            special: Some(case),
        }
    }

    fn handler(
        handler: &IndexedHandler,
        confidence: f32,
        reason: impl Into<String>,
        method: RouteMethod,
    ) -> Self {
        Self {
            handler_id: Some(handler.def.id),
            handler_name: Some(handler.def.name.clone()),
            confidence,
            reason: reason.into(),
            method,
            special: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Continuity rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Similarity at or above which a message continues the previous topic.
const CONTINUITY_MIN_SIMILARITY: f32 = 0.3;
/// Confidence assigned to a continuity decision.
const CONTINUITY_CONFIDENCE: f32 = 0.75;
/// Semantic-stage score threshold.
const SEMANTIC_MIN_SCORE: f32 = 0.5;
/// Semantic-stage shortlist size.
const SEMANTIC_TOP_K: usize = 3;

const CONTINUATION_MARKERS: &[&str] = &[
    "also",
    "and",
    "what about",
    "how about",
    "additionally",
    "furthermore",
    "moreover",
    "one more thing",
];

/// Whole-word (or whole-phrase) continuation marker check.
pub fn has_continuation_marker(message: &str) -> bool {
    let lower = format!(" {} ", message.to_lowercase());
    CONTINUATION_MARKERS.iter().any(|marker| {
        let padded = format!(" {marker} ");
        lower.contains(&padded)
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Router {
    config: RoutingConfig,
    registry: Arc<HandlerRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    classifier: SpecialCaseClassifier,
}

impl Router {
    pub fn new(
        config: RoutingConfig,
        registry: Arc<HandlerRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
        cache: Arc<EmbeddingCache>,
    ) -> Self {
        Self {
            config,
            registry,
            embedder,
            cache,
            classifier: SpecialCaseClassifier::new(),
        }
    }

    /// Decide which handler (or none) receives the message.
    ///
    /// Mutates `state.working_memory`: the transfer flag, the negative
    /// feedback flag, the no-match streak, and the continuity flag.
    pub async fn route(
        &self,
        message: &str,
        state: &mut ConversationState,
        agent_hint: Option<&str>,
    ) -> Result<RouteDecision> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Ok(self.finish(state, RouteDecision::none(0.0, "empty")));
        }
        if self.registry.is_empty() {
            return Ok(self.finish(state, RouteDecision::none(0.0, "no_handlers")));
        }

        // A hint naming a registered handler pins the decision for this
        // turn only, skipping every other stage.
        if let Some(hint) = agent_hint {
            if let Some(handler) = self.registry.get_by_name(hint) {
                let score = keyword::score_handler(&handler, trimmed, &trimmed.to_lowercase())
                    .max(self.config.high_confidence_threshold);
                let decision =
                    RouteDecision::handler(&handler, score, "agent_hint", RouteMethod::Keyword);
                return Ok(self.finish(state, decision));
            }
        }

        // ── Stage A: special cases ─────────────────────────────────
        let special_case = self
            .classifier
            .classify(trimmed, self.embedder.as_ref(), &self.cache)
            .await?;

        if let Some(case) = special_case {
            match case.category {
                SpecialCategory::Greeting | SpecialCategory::Farewell
                    if case.confidence >= 0.9 && special::word_count(trimmed) <= 5 =>
                {
                    return Ok(self.finish(state, RouteDecision::special(case)));
                }
                SpecialCategory::HumanTransfer if case.confidence >= 0.9 => {
                    state.remember(WM_HUMAN_TRANSFER, serde_json::json!(true));
                    return Ok(self.finish(state, RouteDecision::special(case)));
                }
                SpecialCategory::NegativeFeedback => {
                    state.remember(WM_NEGATIVE_FEEDBACK, serde_json::json!(true));
                }
                _ => {}
            }
        }

        let negative_feedback = state.recall_flag(WM_NEGATIVE_FEEDBACK);
        let no_match_streak = state
            .recall(WM_NO_MATCH_STREAK)
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let dynamic = floor::dynamic_floor(&self.config, no_match_streak, negative_feedback);

        // ── Topic switch detection ─────────────────────────────────
        let topic_switch = match state.recall_str(WM_CURRENT_TOPIC) {
            Some(topic) => {
                let topic = topic.to_owned();
                let sim = self.similarity(trimmed, &topic).await?;
                sim < CONTINUITY_MIN_SIMILARITY
            }
            None => false,
        };
        if topic_switch {
            state.forget(WM_CONTINUE_SAME);
        }

        let last_handler = state.last_handler.and_then(|id| self.registry.get(&id));

        // ── Stage B: continuity ────────────────────────────────────
        if let Some(handler) = &last_handler {
            if !topic_switch && !negative_feedback {
                let continues = if has_continuation_marker(trimmed) {
                    true
                } else if let Some(last_utterance) =
                    state.messages_from(&handler.def.name).last()
                {
                    let content = last_utterance.content.clone();
                    self.similarity(trimmed, &content).await? >= CONTINUITY_MIN_SIMILARITY
                } else {
                    false
                };

                let effective = floor::effective_floor(handler.def.confidence_floor, dynamic);
                if continues && CONTINUITY_CONFIDENCE >= effective {
                    state.remember(WM_CONTINUE_SAME, serde_json::json!(true));
                    let decision = RouteDecision::handler(
                        handler,
                        CONTINUITY_CONFIDENCE,
                        "continuing",
                        RouteMethod::Continuity,
                    );
                    return Ok(self.finish(state, decision));
                }
            }
        }

        // ── Stage C: keyword prefilter ─────────────────────────────
        let handlers = self.registry.all();
        let candidates: Vec<KeywordScore> = match keyword::prefilter(&handlers, trimmed) {
            KeywordOutcome::Decided(winner) => {
                let effective =
                    floor::effective_floor(winner.handler.def.confidence_floor, dynamic);
                if winner.score >= effective {
                    let decision = RouteDecision::handler(
                        &winner.handler,
                        winner.score,
                        "keyword_match",
                        RouteMethod::Keyword,
                    );
                    return Ok(self.finish(state, decision));
                }
                // A clear keyword winner below the floor still competes
                // in the semantic stage, where bonuses may lift it.
                vec![winner]
            }
            KeywordOutcome::Candidates(candidates) => candidates,
            KeywordOutcome::NoMatches => Vec::new(),
        };

        // ── Stage D: semantic ──────────────────────────────────────
        let message_vec = self.embed_cached(trimmed).await?;
        let pool: Vec<Arc<IndexedHandler>> = if candidates.is_empty() {
            handlers
        } else {
            candidates.into_iter().map(|c| c.handler).collect()
        };

        let mut scored: Vec<(Arc<IndexedHandler>, f32)> = Vec::with_capacity(pool.len());
        for handler in pool {
            let mut score = cosine_similarity(&message_vec, &handler.embedding);

            let is_last = state.last_handler == Some(handler.def.id);
            if is_last && !topic_switch && !negative_feedback {
                score += self.config.continuity_bonus;
                score += self.config.semantic_relevance_weight
                    * self.prior_turn_relevance(&message_vec, state, &handler).await?;
            }
            if is_last && negative_feedback {
                score -= self.config.negative_feedback_penalty;
            }

            scored.push((handler, score.clamp(0.0, 1.0)));
        }

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        let best_score = scored.first().map(|(_, s)| *s).unwrap_or(0.0);
        scored.retain(|(_, s)| *s >= SEMANTIC_MIN_SCORE);
        scored.truncate(SEMANTIC_TOP_K);

        if let Some((handler, score)) = scored.first() {
            let effective = floor::effective_floor(handler.def.confidence_floor, dynamic);
            if *score >= effective {
                let decision = RouteDecision::handler(
                    handler,
                    *score,
                    "semantic_match",
                    RouteMethod::Semantic,
                );
                return Ok(self.finish(state, decision));
            }
        }

        Ok(self.finish(state, RouteDecision::none(best_score, "below_threshold")))
    }

    // ── Bookkeeping ────────────────────────────────────────────────

    /// Update the no-match streak, consume the negative-feedback flag,
    /// and emit the decision trace.
    fn finish(&self, state: &mut ConversationState, decision: RouteDecision) -> RouteDecision {
        match decision.method {
            RouteMethod::None if decision.reason == "below_threshold" => {
                let streak = state
                    .recall(WM_NO_MATCH_STREAK)
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                state.remember(WM_NO_MATCH_STREAK, serde_json::json!(streak + 1));
            }
            RouteMethod::Special | RouteMethod::None => {}
            _ => {
                state.remember(WM_NO_MATCH_STREAK, serde_json::json!(0));
            }
        }
        // The raised floor applies to the routing of the feedback message
        // itself; it does not persist past it.
        state.forget(WM_NEGATIVE_FEEDBACK);

        TraceEvent::RouteDecision {
            session_id: state.session_id.clone(),
            handler: decision.handler_name.clone(),
            confidence: decision.confidence,
            method: format!("{:?}", decision.method).to_lowercase(),
            reason: decision.reason.clone(),
        }
        .emit();
        decision
    }

    /// Max similarity of the message to the handler's prior-turn messages.
    async fn prior_turn_relevance(
        &self,
        message_vec: &[f32],
        state: &ConversationState,
        handler: &IndexedHandler,
    ) -> Result<f32> {
        let mut best: f32 = 0.0;
        let prior: Vec<String> = state
            .messages_from(&handler.def.name)
            .into_iter()
            .rev()
            .take(3)
            .map(|m| m.content.clone())
            .collect();
        for content in prior {
            let vec = self.embed_cached(&content).await?;
            best = best.max(cosine_similarity(message_vec, &vec));
        }
        Ok(best)
    }

    async fn similarity(&self, a: &str, b: &str) -> Result<f32> {
        let va = self.embed_cached(a).await?;
        let vb = self.embed_cached(b).await?;
        Ok(cosine_similarity(&va, &vb))
    }

    async fn embed_cached(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.cache.get(text) {
            return Ok(hit);
        }
        let vec = self.embedder.embed(text).await?;
        self.cache.put(text, vec.clone());
        Ok(vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_domain::message::Message;
    use sw_handlers::seed;
    use sw_providers::mock::BagOfWordsEmbedder;

    async fn router_with_seeds() -> Router {
        let registry = Arc::new(HandlerRegistry::new());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(BagOfWordsEmbedder::new());
        for def in seed::all() {
            registry.register(def, embedder.as_ref()).await.unwrap();
        }
        Router::new(
            RoutingConfig::default(),
            registry,
            embedder,
            Arc::new(EmbeddingCache::new(256)),
        )
    }

    fn empty_router() -> Router {
        Router::new(
            RoutingConfig::default(),
            Arc::new(HandlerRegistry::new()),
            Arc::new(BagOfWordsEmbedder::new()),
            Arc::new(EmbeddingCache::new(16)),
        )
    }

    #[tokio::test]
    async fn empty_message_routes_nowhere() {
        let router = router_with_seeds().await;
        let mut state = ConversationState::new("s");
        let decision = router.route("   ", &mut state, None).await.unwrap();
        assert_eq!(decision.method, RouteMethod::None);
        assert_eq!(decision.reason, "empty");
        assert_eq!(decision.confidence, 0.0);
    }

    #[tokio::test]
    async fn empty_registry_routes_nowhere() {
        let router = empty_router();
        let mut state = ConversationState::new("s");
        let decision = router.route("hello there", &mut state, None).await.unwrap();
        assert_eq!(decision.reason, "no_handlers");
        assert_eq!(decision.confidence, 0.0);
    }

    #[tokio::test]
    async fn greeting_short_circuits() {
        let router = router_with_seeds().await;
        let mut state = ConversationState::new("s");
        let decision = router.route("hi", &mut state, None).await.unwrap();

        assert_eq!(decision.method, RouteMethod::Special);
        assert_eq!(decision.confidence, 1.0);
        assert!(decision.handler_id.is_none());
        assert_eq!(
            decision.special.unwrap().category,
            SpecialCategory::Greeting
        );
    }

    #[tokio::test]
    async fn long_greeting_like_message_is_not_short_circuited() {
        let router = router_with_seeds().await;
        let mut state = ConversationState::new("s");
        let decision = router
            .route(
                "hi, I ordered a desk last week and want to track the package",
                &mut state,
                None,
            )
            .await
            .unwrap();
        assert_ne!(decision.method, RouteMethod::Special);
        assert_eq!(decision.handler_name.as_deref(), Some("PackageTracking"));
    }

    #[tokio::test]
    async fn human_transfer_sets_flag_and_short_circuits() {
        let router = router_with_seeds().await;
        let mut state = ConversationState::new("s");
        let decision = router
            .route("I want to speak to a human", &mut state, None)
            .await
            .unwrap();
        assert_eq!(decision.method, RouteMethod::Special);
        assert!(state.recall_flag(WM_HUMAN_TRANSFER));
    }

    #[tokio::test]
    async fn keyword_match_routes_tracking() {
        let router = router_with_seeds().await;
        let mut state = ConversationState::new("s");
        let decision = router
            .route("where is my order OD1234567, zip 02108", &mut state, None)
            .await
            .unwrap();

        assert_eq!(decision.handler_name.as_deref(), Some("PackageTracking"));
        assert_eq!(decision.method, RouteMethod::Keyword);
        assert!(decision.confidence >= 0.8);
    }

    #[tokio::test]
    async fn continuation_marker_keeps_last_handler() {
        let router = router_with_seeds().await;
        let mut state = ConversationState::new("s");
        let tracking = router.registry.get_by_name("PackageTracking").unwrap();
        state.last_handler = Some(tracking.def.id);
        state.push_message(Message::user("where is my order"));
        state.push_message(
            Message::assistant("Order OD1 is in transit.").from_agent("PackageTracking"),
        );

        let decision = router
            .route("and what about my other one", &mut state, None)
            .await
            .unwrap();

        assert_eq!(decision.method, RouteMethod::Continuity);
        assert_eq!(decision.confidence, CONTINUITY_CONFIDENCE);
        assert_eq!(decision.handler_name.as_deref(), Some("PackageTracking"));
        assert!(state.recall_flag(WM_CONTINUE_SAME));
    }

    #[tokio::test]
    async fn topic_switch_clears_continuity_flag_and_reroutes() {
        let router = router_with_seeds().await;
        let mut state = ConversationState::new("s");
        let tracking = router.registry.get_by_name("PackageTracking").unwrap();
        state.last_handler = Some(tracking.def.id);
        state.remember(WM_CONTINUE_SAME, serde_json::json!(true));
        state.remember(
            WM_CURRENT_TOPIC,
            serde_json::json!("where is my order and package delivery"),
        );

        let decision = router
            .route("I want to reset my password", &mut state, None)
            .await
            .unwrap();

        assert!(state.recall(WM_CONTINUE_SAME).is_none());
        assert_eq!(decision.handler_name.as_deref(), Some("ResetPassword"));
    }

    #[tokio::test]
    async fn negative_feedback_suppresses_continuity() {
        let router = router_with_seeds().await;
        let mut state = ConversationState::new("s");
        let tracking = router.registry.get_by_name("PackageTracking").unwrap();
        state.last_handler = Some(tracking.def.id);
        state.push_message(
            Message::assistant("Order OD1 is in transit.").from_agent("PackageTracking"),
        );

        // Contains both negative feedback and a continuation marker; the
        // feedback must win and block the continuity stage.
        let decision = router
            .route("that's not right, and it was not helpful", &mut state, None)
            .await
            .unwrap();
        assert_ne!(decision.method, RouteMethod::Continuity);
    }

    #[tokio::test]
    async fn unmatched_messages_grow_the_streak() {
        let router = router_with_seeds().await;
        let mut state = ConversationState::new("s");

        router
            .route("ponder the meaning of cheese", &mut state, None)
            .await
            .unwrap();
        router
            .route("seriously, cheese philosophy", &mut state, None)
            .await
            .unwrap();
        assert_eq!(
            state.recall(WM_NO_MATCH_STREAK).and_then(|v| v.as_u64()),
            Some(2)
        );

        // A successful match resets the streak.
        router
            .route("track my package please", &mut state, None)
            .await
            .unwrap();
        assert_eq!(
            state.recall(WM_NO_MATCH_STREAK).and_then(|v| v.as_u64()),
            Some(0)
        );
    }

    #[tokio::test]
    async fn agent_hint_pins_routing() {
        let router = router_with_seeds().await;
        let mut state = ConversationState::new("s");
        let decision = router
            .route("hi", &mut state, Some("StoreLocator"))
            .await
            .unwrap();

        assert_eq!(decision.handler_name.as_deref(), Some("StoreLocator"));
        assert_eq!(decision.reason, "agent_hint");
        assert!(decision.confidence >= 0.85);
    }

    #[tokio::test]
    async fn unknown_agent_hint_falls_through() {
        let router = router_with_seeds().await;
        let mut state = ConversationState::new("s");
        let decision = router
            .route("hi", &mut state, Some("NoSuchHandler"))
            .await
            .unwrap();
        assert_eq!(decision.method, RouteMethod::Special);
    }

    #[test]
    fn continuation_markers_are_whole_word() {
        assert!(has_continuation_marker("and another thing"));
        assert!(has_continuation_marker("what about my refund"));
        assert!(!has_continuation_marker("android phones are great"));
        assert!(!has_continuation_marker("sandy beaches"));
    }
}
