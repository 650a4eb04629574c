//! Slot collection state and validation flow.
//!
//! `SlotState` is the per-turn record for one slot; the free functions
//! here implement the validation/attempt discipline the executor drives.
//! State is kept in declaration order (a `Vec`, not a map) so
//! `next_missing` has a stable tie-break.

use serde::{Deserialize, Serialize};

use crate::definition::SlotDefinition;

/// Per-turn collection state for a single slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotState {
    /// Set only when validation passed.
    pub value: Option<String>,
    pub attempts: u32,
    pub collected: bool,
}

/// Named slot state, ordered by handler declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotEntry {
    pub name: String,
    #[serde(flatten)]
    pub state: SlotState,
}

/// Fresh slot states for a handler's declaration list.
pub fn initial_states(defs: &[SlotDefinition]) -> Vec<SlotEntry> {
    defs.iter()
        .map(|d| SlotEntry {
            name: d.name.clone(),
            state: SlotState::default(),
        })
        .collect()
}

/// Validate a candidate against the slot definition.
pub fn is_valid(def: &SlotDefinition, candidate: &str) -> bool {
    if candidate.is_empty() {
        return false;
    }
    match &def.validation_regex {
        None => true,
        Some(pattern) => regex::Regex::new(pattern)
            .map(|re| re.is_match(candidate))
            .unwrap_or(false),
    }
}

/// Apply an extracted candidate to a slot's state.
///
/// Returns `true` when the candidate validated and was stored. A failed
/// validation bumps `attempts`; the bound itself (`attempts ==
/// max_attempts`) is the terminal transition the executor checks via
/// [`first_terminal_bad`].
pub fn apply_candidate(def: &SlotDefinition, entry: &mut SlotEntry, candidate: &str) -> bool {
    debug_assert_eq!(def.name, entry.name);
    if is_valid(def, candidate) {
        entry.state.value = Some(candidate.to_owned());
        entry.state.collected = true;
        true
    } else {
        if entry.state.attempts < def.max_attempts {
            entry.state.attempts += 1;
        }
        false
    }
}

/// First required, not-yet-collected slot in declaration order.
pub fn next_missing<'a>(
    defs: &'a [SlotDefinition],
    states: &[SlotEntry],
) -> Option<&'a SlotDefinition> {
    defs.iter().find(|d| {
        d.required
            && !states
                .iter()
                .find(|e| e.name == d.name)
                .map(|e| e.state.collected)
                .unwrap_or(false)
    })
}

/// First slot that exhausted its validation attempts without collecting.
pub fn first_terminal_bad<'a>(
    defs: &'a [SlotDefinition],
    states: &[SlotEntry],
) -> Option<&'a SlotDefinition> {
    defs.iter().find(|d| {
        states
            .iter()
            .find(|e| e.name == d.name)
            .map(|e| !e.state.collected && e.state.attempts >= d.max_attempts)
            .unwrap_or(false)
    })
}

/// Collected `slot → value` pairs, for templates and the response envelope.
pub fn collected_values(states: &[SlotEntry]) -> Vec<(String, String)> {
    states
        .iter()
        .filter_map(|e| {
            e.state
                .value
                .as_ref()
                .map(|v| (e.name.clone(), v.clone()))
        })
        .collect()
}
