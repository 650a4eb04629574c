use serde::Serialize;

/// Structured trace events emitted across all Switchboard crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    RequestReceived {
        session_id: String,
        message_chars: usize,
    },
    RouteDecision {
        session_id: String,
        handler: Option<String>,
        confidence: f32,
        method: String,
        reason: String,
    },
    TurnSuspended {
        session_id: String,
        handler: String,
        missing_slot: String,
        collection_turns: u32,
    },
    TurnCompleted {
        session_id: String,
        handler: String,
        exit_reason: String,
        duration_ms: u64,
    },
    ToolInvoked {
        handler: String,
        tool_name: String,
        is_error: bool,
        duration_ms: u64,
    },
    SafetyViolation {
        rule: String,
        severity: String,
    },
    StatePersisted {
        session_id: String,
        state_id: String,
        dirty: bool,
    },
    StateRecovered {
        session_id: String,
        fresh: bool,
    },
    CheckpointCreated {
        session_id: String,
        name: String,
    },
    CheckpointsDrained {
        session_id: String,
        count: usize,
    },
    SessionEvicted {
        session_id: String,
    },
    HandlerRegistered {
        handler_id: String,
        name: String,
        patterns: usize,
        slots: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sw_event");
    }
}
