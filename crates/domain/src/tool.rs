use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool a handler is permitted to call, as declared at registration.
/// `parameters` is a JSON Schema object describing the arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    /// Names of the `required` properties in the parameter schema.
    pub fn required_params(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

/// A concrete tool invocation requested during a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub tool_args: Value,
}

/// The result of a tool invocation. Failures are data, not errors: the
/// template layer decides whether to retry or degrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolOutcome {
    Ok { result: Value },
    Error { error: String },
}

impl ToolOutcome {
    pub fn ok(result: Value) -> Self {
        Self::Ok { result }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// The result payload, or `Null` for errors.
    pub fn result(&self) -> &Value {
        match self {
            Self::Ok { result } => result,
            Self::Error { .. } => &Value::Null,
        }
    }
}
