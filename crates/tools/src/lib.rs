//! Tool dispatch for handlers.
//!
//! Handlers declare the tools they may call; the registry enforces that
//! scope at dispatch time. Tool failures are surfaced as
//! [`ToolOutcome::Error`] values. They never abort the enclosing turn;
//! the template layer decides whether to retry or degrade.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use sw_domain::tool::ToolOutcome;
use sw_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One pluggable tool. Implementations own their transport (HTTP, DB,
/// canned data) and always answer with a structured outcome.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, args: &Value) -> ToolOutcome;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide tool registry with handler-scoped dispatch.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.write().insert(tool.name().to_owned(), tool);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Dispatch a tool call on behalf of a handler.
    ///
    /// `allowed` is the handler's declared tool list; calls outside it are
    /// refused with an error outcome, as are calls to unregistered tools.
    pub async fn invoke_scoped(
        &self,
        handler_name: &str,
        allowed: &[String],
        tool_name: &str,
        args: &Value,
    ) -> ToolOutcome {
        if !allowed.iter().any(|t| t == tool_name) {
            return ToolOutcome::error(format!(
                "handler '{handler_name}' is not permitted to call tool '{tool_name}'"
            ));
        }

        let tool = self.tools.read().get(tool_name).cloned();
        let Some(tool) = tool else {
            return ToolOutcome::error(format!("tool '{tool_name}' is not registered"));
        };

        let started = std::time::Instant::now();
        let outcome = tool.invoke(args).await;
        TraceEvent::ToolInvoked {
            handler: handler_name.to_owned(),
            tool_name: tool_name.to_owned(),
            is_error: !outcome.is_ok(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
        outcome
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helper tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool backed by a plain function. The workhorse for demo fixtures
/// and tests.
pub struct FnTool {
    name: String,
    f: Box<dyn Fn(&Value) -> ToolOutcome + Send + Sync>,
}

impl FnTool {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&Value) -> ToolOutcome + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

#[async_trait::async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, args: &Value) -> ToolOutcome {
        (self.f)(args)
    }
}

/// A tool that always answers with the same JSON payload.
pub struct StaticJsonTool {
    name: String,
    payload: Value,
}

impl StaticJsonTool {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

#[async_trait::async_trait]
impl Tool for StaticJsonTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _args: &Value) -> ToolOutcome {
        ToolOutcome::ok(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with_tracker() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(StaticJsonTool::new(
            "track_order",
            json!({ "status": "in transit", "eta": "Thursday" }),
        )));
        registry
    }

    #[tokio::test]
    async fn scoped_invoke_succeeds_for_declared_tool() {
        let registry = registry_with_tracker();
        let outcome = registry
            .invoke_scoped(
                "PackageTracking",
                &["track_order".to_owned()],
                "track_order",
                &json!({ "order_number": "OD1234567" }),
            )
            .await;
        assert!(outcome.is_ok());
        assert_eq!(outcome.result()["eta"], "Thursday");
    }

    #[tokio::test]
    async fn undeclared_tool_is_refused() {
        let registry = registry_with_tracker();
        let outcome = registry
            .invoke_scoped("StoreLocator", &["find_store".to_owned()], "track_order", &json!({}))
            .await;
        assert!(!outcome.is_ok());
        match outcome {
            ToolOutcome::Error { error } => assert!(error.contains("not permitted")),
            ToolOutcome::Ok { .. } => panic!("expected refusal"),
        }
    }

    #[tokio::test]
    async fn unregistered_tool_is_an_error_outcome() {
        let registry = ToolRegistry::new();
        let outcome = registry
            .invoke_scoped("X", &["ghost".to_owned()], "ghost", &json!({}))
            .await;
        match outcome {
            ToolOutcome::Error { error } => assert!(error.contains("not registered")),
            ToolOutcome::Ok { .. } => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn fn_tool_sees_arguments() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FnTool::new("echo_city", |args| {
            match args.get("city").and_then(|v| v.as_str()) {
                Some(city) => ToolOutcome::ok(json!({ "echo": city })),
                None => ToolOutcome::error("missing city"),
            }
        })));

        let ok = registry
            .invoke_scoped("S", &["echo_city".to_owned()], "echo_city", &json!({"city": "Boston"}))
            .await;
        assert_eq!(ok.result()["echo"], "Boston");

        let err = registry
            .invoke_scoped("S", &["echo_city".to_owned()], "echo_city", &json!({}))
            .await;
        assert!(!err.is_ok());
    }
}
