//! Response rendering: template filling and LLM-output recovery.
//!
//! Templates use `{{slot_name}}` placeholders for collected slots and
//! `{{tool.<tool_name>.<field>}}` paths into tool results. Every
//! placeholder is either filled or elided; an unresolved placeholder
//! never reaches the user.

use std::collections::HashMap;

use serde_json::Value;

use sw_domain::tool::{ToolCall, ToolOutcome};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Template filling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fill a template from collected slots and tool outcomes.
pub fn fill_template(
    template: &str,
    slots: &[(String, String)],
    tools: &HashMap<String, ToolOutcome>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            // Unbalanced braces: emit the remainder verbatim.
            out.push_str(&rest[open..]);
            rest = "";
            break;
        };
        let key = after_open[..close].trim();
        if let Some(value) = resolve_placeholder(key, slots, tools) {
            out.push_str(&value);
        }
        // Missing value: elide the placeholder entirely.
        rest = &after_open[close + 2..];
    }
    out.push_str(rest);

    tidy_whitespace(&out)
}

fn resolve_placeholder(
    key: &str,
    slots: &[(String, String)],
    tools: &HashMap<String, ToolOutcome>,
) -> Option<String> {
    if let Some(tool_path) = key.strip_prefix("tool.") {
        let mut parts = tool_path.splitn(2, '.');
        let tool_name = parts.next()?;
        let field_path = parts.next().unwrap_or("");
        let outcome = tools.get(tool_name)?;
        if !outcome.is_ok() {
            return None;
        }
        let value = walk_path(outcome.result(), field_path)?;
        return Some(value_to_text(value));
    }

    slots
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.clone())
}

fn walk_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Collapse the scars elision leaves behind: runs of spaces and spaces
/// before punctuation.
fn tidy_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for c in text.chars() {
        if c == ' ' {
            if last_space {
                continue;
            }
            last_space = true;
            out.push(c);
        } else {
            if last_space && matches!(c, '.' | ',' | '!' | '?' | ';' | ':') {
                out.pop();
            }
            last_space = false;
            out.push(c);
        }
    }
    out.trim().to_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM output recovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The first balanced `{…}` substring, for recovering JSON from chatty
/// LLM output. String literals and escapes are honored.
pub fn extract_first_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a `{tool_name, tool_args}` plan from LLM output, with the
/// one-shot JSON recovery pass. `tool_name: null` (or absent) means the
/// model chose not to call a tool.
pub fn parse_tool_plan(text: &str) -> Option<ToolCall> {
    let parsed: Value = serde_json::from_str(text)
        .ok()
        .or_else(|| extract_first_json(text).and_then(|s| serde_json::from_str(s).ok()))?;

    let tool_name = parsed.get("tool_name")?.as_str()?.to_owned();
    let tool_args = parsed.get("tool_args").cloned().unwrap_or(Value::Null);
    Some(ToolCall {
        tool_name,
        tool_args,
    })
}
