use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sw_domain::error::{Error, Result};
use sw_domain::tool::ToolSpec;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trigger patterns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// Whole-word keyword match against the message.
    Keyword,
    /// Whole-word regular expression match.
    Regex,
    /// Joins the handler's embedding text; no keyword-stage scoring.
    Semantic,
    /// Message-prefix match.
    Prefix,
}

/// A routing trigger. `boost` is added to the stage-C base score for the
/// pattern kind, clamped so the total stays within [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerPattern {
    pub kind: PatternKind,
    pub value: String,
    #[serde(default)]
    pub boost: f32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slot definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One piece of information a handler needs before it can answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlotDefinition {
    /// snake_case identifier, unique within the handler.
    pub name: String,
    #[serde(default = "d_true")]
    pub required: bool,
    #[serde(default)]
    pub validation_regex: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub examples: Vec<String>,
    /// Alternate user phrasings ("tracking number" for order_number).
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl SlotDefinition {
    /// Human phrasing of the slot name ("order number").
    pub fn spoken_name(&self) -> String {
        self.name.replace('_', " ")
    }

    /// Description for prompts, defaulting from the name when unset.
    pub fn prompt_description(&self) -> String {
        if self.description.is_empty() {
            format!("the {} for this request", self.spoken_name())
        } else {
            self.description.clone()
        }
    }

    /// Reprompt text for a failed validation.
    pub fn reprompt_message(&self) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| format!("Please provide a valid {}.", self.spoken_name()))
    }
}

fn d_true() -> bool {
    true
}

fn d_max_attempts() -> u32 {
    3
}

fn d_confidence_floor() -> f32 {
    0.5
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler definition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A registered specialist. Immutable after registration; the embedding is
/// computed once by the registry and never carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub patterns: Vec<TriggerPattern>,
    #[serde(default)]
    pub slots: Vec<SlotDefinition>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    /// Template name → template body with `{{slot}}` placeholders.
    #[serde(default)]
    pub response_templates: HashMap<String, String>,
    #[serde(default)]
    pub example_utterances: Vec<String>,
    #[serde(default = "d_confidence_floor")]
    pub confidence_floor: f32,
}

impl HandlerDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            patterns: Vec::new(),
            slots: Vec::new(),
            tools: Vec::new(),
            response_templates: HashMap::new(),
            example_utterances: Vec::new(),
            confidence_floor: d_confidence_floor(),
        }
    }

    /// Structural validation applied before registration.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("handler name must not be empty".into()));
        }
        for p in &self.patterns {
            if !(0.0..=1.0).contains(&p.boost) {
                return Err(Error::InvalidInput(format!(
                    "pattern '{}': boost {} outside [0, 1]",
                    p.value, p.boost
                )));
            }
            if p.kind == PatternKind::Regex {
                regex::Regex::new(&p.value).map_err(|e| {
                    Error::InvalidInput(format!("pattern '{}': bad regex: {e}", p.value))
                })?;
            }
        }
        let mut seen = std::collections::HashSet::new();
        for slot in &self.slots {
            if !is_snake_case(&slot.name) {
                return Err(Error::InvalidInput(format!(
                    "slot '{}' is not snake_case",
                    slot.name
                )));
            }
            if !seen.insert(slot.name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate slot '{}'",
                    slot.name
                )));
            }
            if let Some(pattern) = &slot.validation_regex {
                regex::Regex::new(pattern).map_err(|e| {
                    Error::InvalidInput(format!("slot '{}': bad regex: {e}", slot.name))
                })?;
            }
        }
        Ok(())
    }

    /// The text joined into this handler's embedding: name, description,
    /// examples, semantic pattern values, and slot descriptions.
    pub fn embedding_text(&self) -> String {
        let mut parts = vec![self.name.clone(), self.description.clone()];
        parts.extend(self.example_utterances.iter().cloned());
        parts.extend(
            self.patterns
                .iter()
                .filter(|p| p.kind == PatternKind::Semantic)
                .map(|p| p.value.clone()),
        );
        parts.extend(self.slots.iter().map(|s| s.prompt_description()));
        parts.join("\n")
    }

    /// Look up a tool spec by name within this handler's declared list.
    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn template(&self, name: &str) -> Option<&str> {
        self.response_templates.get(name).map(String::as_str)
    }
}

fn is_snake_case(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with('_')
}
