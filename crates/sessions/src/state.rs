//! The persisted conversation state object and the per-turn record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use sw_domain::message::{Message, Role};
use sw_handlers::slots::SlotEntry;

/// Keys `working_memory` may hold before inserts are refused.
const WORKING_MEMORY_CAP: usize = 32;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Exit reasons
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Terminal label on a turn. Serialized as the wire string
/// (`max_attempts_exceeded:<slot>` carries the slot name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Completed,
    Timeout,
    MaxTurnsExceeded,
    MaxAttemptsExceeded(String),
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Timeout => write!(f, "timeout"),
            Self::MaxTurnsExceeded => write!(f, "max_turns_exceeded"),
            Self::MaxAttemptsExceeded(slot) => write!(f, "max_attempts_exceeded:{slot}"),
        }
    }
}

impl std::str::FromStr for ExitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "timeout" => Ok(Self::Timeout),
            "max_turns_exceeded" => Ok(Self::MaxTurnsExceeded),
            other => match other.strip_prefix("max_attempts_exceeded:") {
                Some(slot) if !slot.is_empty() => {
                    Ok(Self::MaxAttemptsExceeded(slot.to_owned()))
                }
                _ => Err(format!("unrecognized exit reason '{other}'")),
            },
        }
    }
}

impl Serialize for ExitReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ExitReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The slot-filling turn currently in flight for a session. Present only
/// between routing and completion; a suspended multi-message collection
/// keeps it across requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub handler_id: Uuid,
    pub handler_name: String,
    pub slot_states: Vec<SlotEntry>,
    pub collection_turns: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<ExitReason>,
    /// The slot the assistant asked for on the previous collection turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_slot: Option<String>,
    /// Safety violations recorded during OutputCheck.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Value>,
}

impl Turn {
    pub fn new(handler_id: Uuid, handler_name: String, slot_states: Vec<SlotEntry>) -> Self {
        Self {
            handler_id,
            handler_name,
            slot_states,
            collection_turns: 0,
            exit_reason: None,
            pending_slot: None,
            violations: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence flags & checkpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceFlags {
    /// The in-memory copy has advanced past its persisted copy.
    #[serde(default)]
    pub dirty: bool,
    /// Checkpoint names that could not be written; drained FIFO by the
    /// next successful persistence.
    #[serde(default)]
    pub pending_checkpoints: Vec<String>,
}

/// A named checkpoint reference, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub name: String,
    pub snapshot_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The entire persisted object for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_handler: Option<Uuid>,
    #[serde(default)]
    pub working_memory: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_turn: Option<Turn>,
    #[serde(default)]
    pub checkpoints: Vec<CheckpointRef>,
    #[serde(default)]
    pub persistence_flags: PersistenceFlags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            last_handler: None,
            working_memory: HashMap::new(),
            current_turn: None,
            checkpoints: Vec::new(),
            persistence_flags: PersistenceFlags::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message. History within a session is append-only.
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Most recent user message content, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Messages attributed to a handler (for the router's relevance bonus).
    pub fn messages_from(&self, handler_name: &str) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.agent.as_deref() == Some(handler_name))
            .collect()
    }

    /// Insert into working memory, refusing writes past the key cap.
    pub fn remember(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if !self.working_memory.contains_key(&key)
            && self.working_memory.len() >= WORKING_MEMORY_CAP
        {
            tracing::warn!(key = %key, "working memory full; dropping insert");
            return;
        }
        self.working_memory.insert(key, value);
    }

    pub fn recall(&self, key: &str) -> Option<&Value> {
        self.working_memory.get(key)
    }

    pub fn recall_str(&self, key: &str) -> Option<&str> {
        self.working_memory.get(key).and_then(|v| v.as_str())
    }

    pub fn recall_flag(&self, key: &str) -> bool {
        self.working_memory
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn forget(&mut self, key: &str) {
        self.working_memory.remove(key);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serialize a whole state to its JSON blob form.
pub fn serialize_state(state: &ConversationState) -> sw_domain::Result<String> {
    Ok(serde_json::to_string(state)?)
}

/// Deserialize a state blob, reviving ISO-like timestamp strings inside
/// `working_memory` into canonical RFC 3339 form.
pub fn deserialize_state(blob: &str) -> sw_domain::Result<ConversationState> {
    let mut state: ConversationState = serde_json::from_str(blob)?;
    for value in state.working_memory.values_mut() {
        revive_timestamps(value);
    }
    Ok(state)
}

/// Re-parse ISO-like strings (≥ 20 chars, containing `T`, ending with a
/// timezone marker) as timestamps, normalizing their representation.
fn revive_timestamps(value: &mut Value) {
    match value {
        Value::String(s) => {
            if looks_like_timestamp(s) {
                if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                    *s = ts.with_timezone(&Utc).to_rfc3339();
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(revive_timestamps),
        Value::Object(map) => map.values_mut().for_each(revive_timestamps),
        _ => {}
    }
}

fn looks_like_timestamp(s: &str) -> bool {
    s.len() >= 20
        && s.contains('T')
        && (s.ends_with('Z') || s.get(s.len() - 6..).is_some_and(has_tz_offset))
}

fn has_tz_offset(tail: &str) -> bool {
    let bytes = tail.as_bytes();
    bytes.len() == 6
        && (bytes[0] == b'+' || bytes[0] == b'-')
        && bytes[3] == b':'
        && bytes[1].is_ascii_digit()
        && bytes[2].is_ascii_digit()
        && bytes[4].is_ascii_digit()
        && bytes[5].is_ascii_digit()
}
