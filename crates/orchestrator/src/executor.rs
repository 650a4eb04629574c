//! The per-turn state machine.
//!
//! One call drives a routed handler through
//! `InputCheck → SlotFill → ToolInvoke → Render → OutputCheck → Done`,
//! or suspends at SlotFill awaiting the next user message. The executor
//! never surfaces slot or tool failures as errors; they become
//! reprompts, handoffs, or degraded tool results. LLM failures propagate
//! for the orchestrator to translate.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use sw_domain::config::SlotsConfig;
use sw_domain::error::{Error, Result};
use sw_domain::retry::{with_retry, RetryPolicy};
use sw_domain::tool::{ToolOutcome, ToolSpec};
use sw_handlers::extract::SlotExtractor;
use sw_handlers::slots;
use sw_handlers::{IndexedHandler, SlotDefinition};
use sw_providers::{CompletionRequest, LlmProvider};
use sw_safety::{InputVerdict, SafetyFilter, Severity, RULE_SENSITIVE_INFORMATION};
use sw_sessions::{ConversationState, ExitReason, Turn};
use sw_tools::ToolRegistry;

use crate::messages;
use crate::render;
use crate::telemetry::{RequestTrace, TraceNodeKind};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a turn produced: either a final response (`suspended = false`)
/// or a slot-request prompt with the turn held open across requests.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub suspended: bool,
    pub exit_reason: Option<ExitReason>,
    pub entities: Vec<(String, String)>,
    pub tools_used: Vec<String>,
}

impl TurnOutcome {
    fn completed(
        response: String,
        exit_reason: ExitReason,
        entities: Vec<(String, String)>,
        tools_used: Vec<String>,
    ) -> Self {
        Self {
            response,
            suspended: false,
            exit_reason: Some(exit_reason),
            entities,
            tools_used,
        }
    }

    fn suspended(response: String, entities: Vec<(String, String)>) -> Self {
        Self {
            response,
            suspended: true,
            exit_reason: None,
            entities,
            tools_used: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TurnExecutor {
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    safety: Arc<SafetyFilter>,
    extractor: SlotExtractor,
    slots_config: SlotsConfig,
    retry: RetryPolicy,
}

impl TurnExecutor {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        safety: Arc<SafetyFilter>,
        slots_config: SlotsConfig,
    ) -> Self {
        Self {
            llm,
            tools,
            safety,
            extractor: SlotExtractor::new(),
            slots_config,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Drive one turn for the routed handler.
    pub async fn run_turn(
        &self,
        handler: &IndexedHandler,
        state: &mut ConversationState,
        message: &str,
        input_verdict: &InputVerdict,
        trace: &mut RequestTrace,
    ) -> Result<TurnOutcome> {
        // ── InputCheck ─────────────────────────────────────────────
        if input_verdict.out_of_scope {
            let body = handler
                .def
                .template("out_of_scope")
                .unwrap_or(messages::OUT_OF_SCOPE_REDIRECT);
            let response = self.output_check(body.to_owned(), state.current_turn.as_mut(), trace);
            return Ok(TurnOutcome::completed(
                response,
                ExitReason::Completed,
                Vec::new(),
                Vec::new(),
            ));
        }

        // ── SlotFill ───────────────────────────────────────────────
        if state.current_turn.is_none() {
            state.current_turn = Some(Turn::new(
                handler.def.id,
                handler.def.name.clone(),
                slots::initial_states(&handler.def.slots),
            ));
        }
        let turn = state
            .current_turn
            .as_mut()
            .expect("current_turn created above");
        debug_assert_eq!(turn.handler_id, handler.def.id, "turn/handler mismatch");

        let slot_fill_started = Utc::now();
        let pending = turn.pending_slot.take();
        let report = self.extractor.extract_into(
            message,
            &handler.def.slots,
            &mut turn.slot_states,
            pending.as_deref(),
        );
        trace.push_node(
            TraceNodeKind::HandlerCall,
            "slot_fill",
            slot_fill_started,
            json!({
                "extracted": report.iter().filter(|e| e.accepted).count(),
                "rejected": report.iter().filter(|e| !e.accepted).count(),
            }),
            false,
        );

        if let Some(missing) = slots::next_missing(&handler.def.slots, &turn.slot_states) {
            if turn.collection_turns >= self.slots_config.max_collection_turns {
                turn.exit_reason = Some(ExitReason::MaxTurnsExceeded);
                return Ok(self.handoff(handler, state, ExitReason::MaxTurnsExceeded, trace));
            }
            if let Some(bad) = slots::first_terminal_bad(&handler.def.slots, &turn.slot_states) {
                let reason = ExitReason::MaxAttemptsExceeded(bad.name.clone());
                turn.exit_reason = Some(reason.clone());
                return Ok(self.handoff(handler, state, reason, trace));
            }

            // Ask for exactly the one missing slot, then suspend.
            let already_tried = turn
                .slot_states
                .iter()
                .find(|e| e.name == missing.name)
                .map(|e| e.state.attempts > 0)
                .unwrap_or(false);
            let prompt = slot_request(missing, already_tried);
            turn.collection_turns += 1;
            turn.pending_slot = Some(missing.name.clone());
            let collection_turns = turn.collection_turns;
            let entities = slots::collected_values(&turn.slot_states);

            sw_domain::trace::TraceEvent::TurnSuspended {
                session_id: state.session_id.clone(),
                handler: handler.def.name.clone(),
                missing_slot: missing.name.clone(),
                collection_turns,
            }
            .emit();

            let response = self.output_check(prompt, state.current_turn.as_mut(), trace);
            return Ok(TurnOutcome::suspended(response, entities));
        }

        let entities = slots::collected_values(&turn.slot_states);

        // ── ToolInvoke ─────────────────────────────────────────────
        let (tool_results, tools_used) = self
            .invoke_tools(handler, message, &entities, trace)
            .await?;

        // ── Render ─────────────────────────────────────────────────
        let render_started = Utc::now();
        let body = self
            .render_response(handler, message, &entities, &tool_results)
            .await?;
        trace.push_node(
            TraceNodeKind::Response,
            "render",
            render_started,
            Value::Null,
            false,
        );

        // ── OutputCheck → Done ─────────────────────────────────────
        let response = self.output_check(body, state.current_turn.as_mut(), trace);
        if let Some(turn) = state.current_turn.as_mut() {
            turn.exit_reason = Some(ExitReason::Completed);
        }
        Ok(TurnOutcome::completed(
            response,
            ExitReason::Completed,
            entities,
            tools_used,
        ))
    }

    // ── Handoff ────────────────────────────────────────────────────

    fn handoff(
        &self,
        handler: &IndexedHandler,
        state: &mut ConversationState,
        reason: ExitReason,
        trace: &mut RequestTrace,
    ) -> TurnOutcome {
        let body = handler
            .def
            .template("handoff")
            .unwrap_or(messages::DEFAULT_HANDOFF)
            .to_owned();
        let entities = state
            .current_turn
            .as_ref()
            .map(|t| slots::collected_values(&t.slot_states))
            .unwrap_or_default();
        let response = self.output_check(body, state.current_turn.as_mut(), trace);
        TurnOutcome::completed(response, reason, entities, Vec::new())
    }

    // ── ToolInvoke ─────────────────────────────────────────────────

    async fn invoke_tools(
        &self,
        handler: &IndexedHandler,
        message: &str,
        entities: &[(String, String)],
        trace: &mut RequestTrace,
    ) -> Result<(HashMap<String, ToolOutcome>, Vec<String>)> {
        let mut results = HashMap::new();
        let mut used = Vec::new();
        if handler.def.tools.is_empty() {
            return Ok((results, used));
        }

        let allowed: Vec<String> = handler.def.tools.iter().map(|t| t.name.clone()).collect();

        // Pattern inference first: when every required parameter of a
        // declared tool is a collected slot, no LLM round-trip is needed.
        for spec in &handler.def.tools {
            if let Some(args) = infer_args(spec, entities) {
                let started = Utc::now();
                let outcome = self
                    .tools
                    .invoke_scoped(&handler.def.name, &allowed, &spec.name, &args)
                    .await;
                trace.push_node(
                    TraceNodeKind::ToolCall,
                    &spec.name,
                    started,
                    json!({ "inferred": true }),
                    !outcome.is_ok(),
                );
                used.push(spec.name.clone());
                results.insert(spec.name.clone(), outcome);
            }
        }

        // Otherwise let the model pick one structured call.
        if results.is_empty() {
            match self.plan_tool_call(handler, message, entities).await {
                Ok(Some(call)) => {
                    let started = Utc::now();
                    let outcome = self
                        .tools
                        .invoke_scoped(&handler.def.name, &allowed, &call.tool_name, &call.tool_args)
                        .await;
                    trace.push_node(
                        TraceNodeKind::ToolCall,
                        &call.tool_name,
                        started,
                        json!({ "inferred": false }),
                        !outcome.is_ok(),
                    );
                    used.push(call.tool_name.clone());
                    results.insert(call.tool_name, outcome);
                }
                Ok(None) => {}
                Err(e) if e.kind() == sw_domain::ErrorKind::JsonDecodeError => {
                    // A malformed plan degrades to a tool-less render.
                    trace.record_error("tool_plan", &e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok((results, used))
    }

    /// Ask the model which declared tool to call, if any.
    async fn plan_tool_call(
        &self,
        handler: &IndexedHandler,
        message: &str,
        entities: &[(String, String)],
    ) -> Result<Option<sw_domain::tool::ToolCall>> {
        let specs = serde_json::to_string(&handler.def.tools)?;
        let slots_json = entities_json(entities);
        let prompt = format!(
            "User request: {message}\n\nAvailable tools:\n{specs}\n\n\
             Known values:\n{slots_json}\n\n\
             Reply with JSON: {{\"tool_name\": <name or null>, \"tool_args\": {{...}}}}.",
        );
        let req = CompletionRequest {
            system: Some("You select at most one tool call for a support request.".to_owned()),
            prompt,
            temperature: Some(0.0),
            json_mode: true,
        };

        let llm = self.llm.clone();
        let raw = with_retry("tool_plan", &self.retry, None, move || {
            let llm = llm.clone();
            let req = req.clone();
            async move { llm.complete(req).await }
        })
        .await?;

        match render::parse_tool_plan(&raw) {
            Some(call) => Ok(Some(call)),
            None if raw.contains("null") => Ok(None),
            None => Err(Error::JsonDecode(format!(
                "tool plan was not valid JSON: {}",
                raw.chars().take(120).collect::<String>()
            ))),
        }
    }

    // ── Render ─────────────────────────────────────────────────────

    async fn render_response(
        &self,
        handler: &IndexedHandler,
        message: &str,
        entities: &[(String, String)],
        tool_results: &HashMap<String, ToolOutcome>,
    ) -> Result<String> {
        if let Some(template) = handler.def.template("success") {
            return Ok(render::fill_template(template, entities, tool_results));
        }

        // Free-form prose rendering with structured context.
        let slots_json = entities_json(entities);
        let tools_json = serde_json::to_string(tool_results)?;
        let prompt = format!(
            "You are {name}: {description}\n\n\
             User request: {message}\n\nCollected information:\n{slots_json}\n\n\
             Tool results:\n{tools_json}\n\n\
             Write the final reply to the user. Be concise and concrete.",
            name = handler.def.name,
            description = handler.def.description,
        );
        let req = CompletionRequest {
            system: Some(
                "You are a customer care representative. Never mention being an AI.".to_owned(),
            ),
            prompt,
            temperature: None,
            json_mode: false,
        };

        let llm = self.llm.clone();
        with_retry("render", &self.retry, None, move || {
            let llm = llm.clone();
            let req = req.clone();
            async move { llm.complete(req).await }
        })
        .await
    }

    // ── OutputCheck ────────────────────────────────────────────────

    /// Apply the output safety pass: substitute banned phrases, record
    /// violations on the turn, and suppress sensitive-data segments with
    /// a follow-up request to continue without them.
    fn output_check(
        &self,
        text: String,
        turn: Option<&mut Turn>,
        trace: &mut RequestTrace,
    ) -> String {
        let started = Utc::now();
        let (sanitized, violations) = self.safety.output_pass(&text);

        let sensitive = violations
            .iter()
            .any(|v| v.rule == RULE_SENSITIVE_INFORMATION && v.severity == Severity::High);

        let mut response = sanitized;
        if sensitive {
            response = suppress_segments(&response, &self.safety.sensitive_segments(&response));
            response = format!("{} {}", response.trim(), messages::SENSITIVE_DATA_FOLLOW_UP)
                .trim()
                .to_owned();
        }

        if let Some(turn) = turn {
            for v in &violations {
                if let Ok(value) = serde_json::to_value(v) {
                    turn.violations.push(value);
                }
            }
        }
        trace.push_node(
            TraceNodeKind::Response,
            "output_check",
            started,
            json!({ "violations": violations.len() }),
            false,
        );
        response
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One sentence asking for exactly the missing slot, built from its
/// description and first example.
fn slot_request(slot: &SlotDefinition, already_tried: bool) -> String {
    let example = slot
        .examples
        .first()
        .map(|e| format!(" For example: {e}."))
        .unwrap_or_default();
    if already_tried {
        format!("{}{example}", slot.reprompt_message())
    } else {
        format!("Could you share {}?{example}", slot.prompt_description())
    }
}

/// Synthesize tool args from collected slots when every required schema
/// property is available.
fn infer_args(spec: &ToolSpec, entities: &[(String, String)]) -> Option<Value> {
    let required = spec.required_params();
    if required.is_empty() {
        return None;
    }
    let mut args = serde_json::Map::new();
    for param in required {
        let (_, value) = entities.iter().find(|(name, _)| name == param)?;
        args.insert(param.to_owned(), Value::String(value.clone()));
    }
    Some(Value::Object(args))
}

fn entities_json(entities: &[(String, String)]) -> String {
    let map: serde_json::Map<String, Value> = entities
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map).to_string()
}

/// Remove byte spans from a string, assuming sorted non-overlapping spans.
fn suppress_segments(text: &str, spans: &[(usize, usize)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for &(start, end) in spans {
        if start >= cursor && end <= text.len() {
            out.push_str(&text[cursor..start]);
            cursor = end;
        }
    }
    out.push_str(&text[cursor..]);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
