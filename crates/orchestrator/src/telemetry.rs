//! Per-request execution traces.
//!
//! Every `process` call produces a [`RequestTrace`]: a tree of typed nodes
//! (route decision, handler call, tool calls, response) with timings and
//! any recorded errors. Traces live in a bounded in-memory ring for the
//! inspection endpoint; the structured log stream carries them outward.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use sw_domain::error::Error;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Nodes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceNodeKind {
    InputCheck,
    RouteDecision,
    HandlerCall,
    ToolCall,
    Response,
    Persistence,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceNode {
    pub node_id: u32,
    pub kind: TraceNodeKind,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub detail: Value,
    pub is_error: bool,
}

/// An error recorded against a node, in the response envelope shape.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedError {
    pub node: String,
    pub error_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request trace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct RequestTrace {
    pub trace_id: Uuid,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub input_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_preview: Option<String>,
    pub nodes: Vec<TraceNode>,
    pub errors: Vec<RecordedError>,
    #[serde(skip)]
    next_node_id: u32,
}

impl RequestTrace {
    pub fn begin(session_id: &str, message: &str) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            session_id: session_id.to_owned(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            input_preview: truncate(message, 200),
            output_preview: None,
            nodes: Vec::new(),
            errors: Vec::new(),
            next_node_id: 0,
        }
    }

    /// Record a completed node. `started` anchors the duration.
    pub fn push_node(
        &mut self,
        kind: TraceNodeKind,
        name: &str,
        started: DateTime<Utc>,
        detail: Value,
        is_error: bool,
    ) {
        self.next_node_id += 1;
        let now = Utc::now();
        self.nodes.push(TraceNode {
            node_id: self.next_node_id,
            kind,
            name: name.to_owned(),
            started_at: started,
            duration_ms: (now - started).num_milliseconds().max(0) as u64,
            detail,
            is_error,
        });
    }

    /// Classify and record an error against a named node.
    pub fn record_error(&mut self, node: &str, error: &Error) {
        self.errors.push(RecordedError {
            node: node.to_owned(),
            error_type: error.kind().as_str().to_owned(),
            message: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// The node names in execution order (the response's execution path).
    pub fn execution_path(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.name.clone()).collect()
    }

    pub fn finish(&mut self, output: &str) {
        let now = Utc::now();
        self.output_preview = Some(truncate(output, 200));
        self.ended_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_owned()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trace ring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded in-memory ring of recent request traces.
pub struct TraceStore {
    ring: RwLock<VecDeque<RequestTrace>>,
    capacity: usize,
}

impl TraceStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&self, trace: RequestTrace) {
        let mut ring = self.ring.write();
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(trace);
    }

    /// Most recent traces, newest first.
    pub fn recent(&self, limit: usize) -> Vec<RequestTrace> {
        self.ring.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn get(&self, trace_id: &Uuid) -> Option<RequestTrace> {
        self.ring
            .read()
            .iter()
            .find(|t| t.trace_id == *trace_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.ring.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_collects_nodes_in_order() {
        let mut trace = RequestTrace::begin("s1", "where is my order");
        trace.push_node(
            TraceNodeKind::RouteDecision,
            "router",
            Utc::now(),
            serde_json::json!({ "method": "keyword" }),
            false,
        );
        trace.push_node(
            TraceNodeKind::ToolCall,
            "track_order",
            Utc::now(),
            Value::Null,
            false,
        );
        trace.finish("done");

        assert_eq!(trace.execution_path(), vec!["router", "track_order"]);
        assert_eq!(trace.nodes[0].node_id, 1);
        assert_eq!(trace.nodes[1].node_id, 2);
        assert!(trace.duration_ms.is_some());
    }

    #[test]
    fn errors_carry_taxonomy_types() {
        let mut trace = RequestTrace::begin("s1", "x");
        trace.record_error("render", &Error::LlmRateLimit("429".into()));
        assert_eq!(trace.errors[0].error_type, "llm_rate_limit");
        assert_eq!(trace.errors[0].node, "render");
    }

    #[test]
    fn ring_is_bounded_and_queryable() {
        let store = TraceStore::new(2);
        let t1 = RequestTrace::begin("s1", "one");
        let id1 = t1.trace_id;
        store.insert(t1);
        store.insert(RequestTrace::begin("s2", "two"));
        store.insert(RequestTrace::begin("s3", "three"));

        assert_eq!(store.len(), 2);
        assert!(store.get(&id1).is_none());
        let recent = store.recent(10);
        assert_eq!(recent[0].session_id, "s3");
        assert_eq!(recent[1].session_id, "s2");
    }

    #[test]
    fn input_preview_truncates_long_messages() {
        let long = "x".repeat(500);
        let trace = RequestTrace::begin("s1", &long);
        assert!(trace.input_preview.chars().count() <= 201);
    }
}
