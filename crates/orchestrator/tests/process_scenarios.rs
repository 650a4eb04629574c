//! End-to-end scenarios through `Orchestrator::process` with scripted
//! providers and the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use sw_domain::config::Config;
use sw_domain::retry::RetryPolicy;
use sw_handlers::definition::{HandlerDefinition, PatternKind, TriggerPattern};
use sw_handlers::{seed, HandlerRegistry};
use sw_orchestrator::{Orchestrator, ProcessRequest, RequestContext};
use sw_providers::mock::{AlwaysRateLimitedLlm, BagOfWordsEmbedder, ScriptedLlm};
use sw_providers::LlmProvider;
use sw_sessions::{MemoryBackend, StateBackend};
use sw_tools::{StaticJsonTool, ToolRegistry};

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(1),
        factor: 2.0,
        max_delay: Duration::from_millis(4),
        max_attempts: 3,
        jitter: 0.0,
    }
}

fn demo_tools() -> Arc<ToolRegistry> {
    let tools = Arc::new(ToolRegistry::new());
    tools.register(Arc::new(StaticJsonTool::new(
        "track_order",
        json!({ "status": "in transit", "eta": "Thursday" }),
    )));
    tools.register(Arc::new(StaticJsonTool::new(
        "find_store",
        json!({ "name": "Downtown Crossing", "address": "1 Washington St", "closes": "9pm" }),
    )));
    tools
}

async fn orchestrator_with(
    backend: Arc<MemoryBackend>,
    llm: Arc<dyn LlmProvider>,
    extra: Vec<HandlerDefinition>,
) -> Orchestrator {
    let registry = Arc::new(HandlerRegistry::new());
    let embedder = Arc::new(BagOfWordsEmbedder::new());
    for def in seed::all().into_iter().chain(extra) {
        registry.register(def, embedder.as_ref()).await.unwrap();
    }
    Orchestrator::new(
        Arc::new(Config::default()),
        registry,
        backend,
        llm,
        embedder,
        demo_tools(),
    )
    .with_retry_policy(fast_retries())
}

async fn seeded_orchestrator(backend: Arc<MemoryBackend>) -> Orchestrator {
    orchestrator_with(backend, Arc::new(ScriptedLlm::new()), Vec::new()).await
}

fn request(session: &str, message: &str) -> ProcessRequest {
    ProcessRequest {
        session_id: Some(session.to_owned()),
        message: message.to_owned(),
        context: None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 1: greeting short-circuit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn greeting_short_circuits_without_a_handler() {
    let backend = Arc::new(MemoryBackend::new(5));
    let orchestrator = seeded_orchestrator(backend.clone()).await;

    let resp = orchestrator.process(request("A", "hi")).await;

    assert!(resp.success);
    assert_eq!(resp.handler, "");
    assert_eq!(resp.confidence, 1.0);
    assert!(
        resp.response.starts_with("Hello") || resp.response.starts_with("Hi"),
        "unexpected canned greeting: {}",
        resp.response
    );
    assert!(resp.execution_path.contains(&"router".to_owned()));

    // last_handler untouched, history balanced.
    let state = backend.load_state("A", None).await.unwrap().unwrap();
    assert!(state.last_handler.is_none());
    assert_eq!(state.messages.len(), 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 2: keyword high-confidence routing with entities
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn keyword_routing_extracts_entities_and_renders_template() {
    let backend = Arc::new(MemoryBackend::new(5));
    let orchestrator = seeded_orchestrator(backend.clone()).await;

    let resp = orchestrator
        .process(request("B", "where is my order OD1234567, zip 02108"))
        .await;

    assert!(resp.success);
    assert_eq!(resp.handler, "PackageTracking");
    assert!(resp.confidence >= 0.8, "confidence {}", resp.confidence);
    assert_eq!(resp.entities["order_number"], "OD1234567");
    assert_eq!(resp.entities["zip_code"], "02108");
    assert_eq!(resp.tools_used, vec!["track_order"]);
    assert_eq!(
        resp.response,
        "Order OD1234567 is in transit and should arrive Thursday."
    );
    assert_eq!(resp.exit_reason.as_deref(), Some("completed"));

    // Completed turn: checkpoint written, turn cleared, topic recorded.
    let state = backend.load_state("B", None).await.unwrap().unwrap();
    assert!(state.current_turn.is_none());
    assert!(state.last_handler.is_some());
    let checkpoints = backend.list_checkpoints("B").await.unwrap();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].name, "interaction_1");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 3: multi-turn slot collection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn slot_collection_suspends_and_resumes() {
    let backend = Arc::new(MemoryBackend::new(5));
    let orchestrator = seeded_orchestrator(backend.clone()).await;

    let first = orchestrator
        .process(request("C", "I want to reset my password"))
        .await;
    assert_eq!(first.handler, "ResetPassword");
    assert!(first.exit_reason.is_none(), "turn should be suspended");
    assert!(
        first.response.contains("email address"),
        "prompt should ask for the email slot: {}",
        first.response
    );
    assert!(first.response.contains("joe@example.com"), "prompt carries the example");

    // The suspended turn is persisted across requests.
    let state = backend.load_state("C", None).await.unwrap().unwrap();
    let turn = state.current_turn.as_ref().expect("turn persisted");
    assert_eq!(turn.collection_turns, 1);
    assert_eq!(turn.pending_slot.as_deref(), Some("email"));

    let second = orchestrator.process(request("C", "joe@example.com")).await;
    assert_eq!(second.handler, "ResetPassword", "handler pinned by the open turn");
    assert_eq!(second.entities["email"], "joe@example.com");
    assert_eq!(
        second.response,
        "I've sent password reset instructions to joe@example.com. The link expires in 30 minutes."
    );
    assert_eq!(second.exit_reason.as_deref(), Some("completed"));

    let state = backend.load_state("C", None).await.unwrap().unwrap();
    assert!(state.current_turn.is_none());
    // Two completed exchanges: user/assistant counts stay balanced.
    assert_eq!(state.messages.len(), 4);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 4: max attempts handoff
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn exhausted_slot_attempts_hand_off() {
    let backend = Arc::new(MemoryBackend::new(5));
    let orchestrator = seeded_orchestrator(backend.clone()).await;

    orchestrator
        .process(request("D", "where is my order OD1234567"))
        .await;

    // Two junk answers to the zip prompt burn two attempts.
    for junk in ["banana", "it's purple"] {
        let resp = orchestrator.process(request("D", junk)).await;
        assert!(resp.exit_reason.is_none(), "still collecting after '{junk}'");
        assert!(
            resp.response.contains("valid 5-digit zip code"),
            "reprompt expected: {}",
            resp.response
        );
    }
    let state = backend.load_state("D", None).await.unwrap().unwrap();
    let zip = state.current_turn.as_ref().unwrap().slot_states
        .iter()
        .find(|e| e.name == "zip_code")
        .unwrap();
    assert_eq!(zip.state.attempts, 2);

    // The third failure is the terminal transition.
    let resp = orchestrator.process(request("D", "nope")).await;
    assert_eq!(
        resp.exit_reason.as_deref(),
        Some("max_attempts_exceeded:zip_code")
    );
    assert_eq!(
        resp.response,
        "I wasn't able to collect what I need to look up your order. Let me connect you with a specialist who can help."
    );

    let state = backend.load_state("D", None).await.unwrap().unwrap();
    assert!(state.current_turn.is_none(), "dead turn must be cleared");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 5: LLM rate limit recovery message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn concierge() -> HandlerDefinition {
    // No slots, no tools, no success template: rendering needs the LLM.
    let mut def = HandlerDefinition::new("Concierge", "General help desk.");
    def.patterns = vec![TriggerPattern {
        kind: PatternKind::Keyword,
        value: "help".into(),
        boost: 0.2,
    }];
    def
}

#[tokio::test]
async fn rate_limited_llm_yields_canonical_apology() {
    let backend = Arc::new(MemoryBackend::new(5));
    let orchestrator = orchestrator_with(
        backend.clone(),
        Arc::new(AlwaysRateLimitedLlm),
        vec![concierge()],
    )
    .await;

    let resp = orchestrator
        .process(request("E", "please help me figure this out"))
        .await;

    assert!(resp.success, "errors are reported, never raised");
    assert_eq!(
        resp.response,
        "I'm experiencing a lot of traffic right now. Please try again in a moment."
    );
    let errors = resp.errors.expect("error recorded");
    assert_eq!(errors[0].error_type, "llm_rate_limit");

    // State persisted cleanly despite the LLM failure.
    let state = backend.load_state("E", None).await.unwrap().unwrap();
    assert!(!state.persistence_flags.dirty);
    assert_eq!(state.messages.len(), 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 6: persistence failure degrades gracefully
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn storage_outage_degrades_to_dirty_state_and_drains_later() {
    let backend = Arc::new(MemoryBackend::new(5));
    let orchestrator = seeded_orchestrator(backend.clone()).await;

    backend.set_online(false);
    let resp = orchestrator.process(request("F", "hi there")).await;
    assert!(resp.success);
    assert!(
        resp.response.starts_with("Hello") || resp.response.starts_with("Hi"),
        "response produced normally during the outage: {}",
        resp.response
    );

    // Nothing reached the backend.
    backend.set_online(true);
    assert!(backend.load_state("F", None).await.unwrap().is_none());

    // The next turn drains the accumulated history.
    let resp = orchestrator
        .process(request("F", "where is my order OD1234567, zip 02108"))
        .await;
    assert_eq!(resp.handler, "PackageTracking");

    let state = backend.load_state("F", None).await.unwrap().unwrap();
    assert!(!state.persistence_flags.dirty);
    assert_eq!(state.messages.len(), 4, "outage-era history was written through");
    assert_eq!(state.messages[0].content, "hi there");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Boundaries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn empty_message_is_answered_without_routing() {
    let backend = Arc::new(MemoryBackend::new(5));
    let orchestrator = seeded_orchestrator(backend).await;

    let resp = orchestrator.process(request("G", "   ")).await;
    assert!(resp.success);
    assert_eq!(resp.handler, "");
    assert_eq!(resp.confidence, 0.0);
}

#[tokio::test]
async fn empty_registry_reports_no_handlers() {
    let backend = Arc::new(MemoryBackend::new(5));
    let registry = Arc::new(HandlerRegistry::new());
    let embedder = Arc::new(BagOfWordsEmbedder::new());
    let orchestrator = Orchestrator::new(
        Arc::new(Config::default()),
        registry,
        backend,
        Arc::new(ScriptedLlm::new()),
        embedder,
        Arc::new(ToolRegistry::new()),
    );

    let resp = orchestrator.process(request("H", "track my package")).await;
    assert_eq!(resp.handler, "");
    assert_eq!(
        resp.response,
        "No specialists are available right now. Please try again shortly."
    );
}

#[tokio::test]
async fn out_of_scope_input_is_redirected() {
    let backend = Arc::new(MemoryBackend::new(5));
    let orchestrator = seeded_orchestrator(backend).await;

    let resp = orchestrator
        .process(request("I", "tell me about your hiring process"))
        .await;
    assert!(resp.success);
    assert!(
        resp.response.contains("outside what I can help with")
            || resp.response.contains("reach out to the right team"),
        "expected a redirect: {}",
        resp.response
    );
}

#[tokio::test]
async fn session_id_is_generated_when_absent() {
    let backend = Arc::new(MemoryBackend::new(5));
    let orchestrator = seeded_orchestrator(backend).await;

    let resp = orchestrator
        .process(ProcessRequest {
            session_id: None,
            message: "hi".to_owned(),
            context: None,
        })
        .await;
    assert!(!resp.session_id.is_empty());
}

#[tokio::test]
async fn agent_hint_pins_the_turn() {
    let backend = Arc::new(MemoryBackend::new(5));
    let orchestrator = seeded_orchestrator(backend).await;

    let resp = orchestrator
        .process(ProcessRequest {
            session_id: Some("J".to_owned()),
            message: "hello there my friend".to_owned(),
            context: Some(RequestContext {
                intent: None,
                intent_confidence: None,
                agent_hint: Some("StoreLocator".to_owned()),
            }),
        })
        .await;
    assert_eq!(resp.handler, "StoreLocator");
    // StoreLocator needs a city, so the pinned turn suspends on its slot.
    assert!(resp.response.contains("city"));
}

#[tokio::test]
async fn continuity_keeps_the_previous_handler() {
    let backend = Arc::new(MemoryBackend::new(5));
    let orchestrator = seeded_orchestrator(backend).await;

    orchestrator
        .process(request("K", "where is my order OD1234567, zip 02108"))
        .await;
    let resp = orchestrator
        .process(request("K", "and what about order OD7654321, zip 02108"))
        .await;

    assert_eq!(resp.handler, "PackageTracking");
    assert_eq!(resp.entities["order_number"], "OD7654321");
}
