//! Slot value extraction from user messages.
//!
//! Extraction runs in two layers: well-known value shapes recognized from
//! the slot name (order numbers, zip codes, emails, phone numbers,
//! city/state), then a labeled `"<slot name>: <value>"` pattern driven by
//! the slot's name and aliases. When the executor has just asked for a
//! specific slot, the whole message is the candidate of last resort: a
//! bare "02108" (or a bare "nope") is an answer to the question we asked.

use regex::Regex;

use crate::definition::SlotDefinition;
use crate::slots::{self, SlotEntry};

/// One extraction attempt: what was found and whether validation took it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub slot: String,
    pub candidate: String,
    pub accepted: bool,
}

/// Compiled extraction patterns, built once and shared.
pub struct SlotExtractor {
    order_number: Regex,
    zip_code: Regex,
    email: Regex,
    phone: Regex,
    city_state: Regex,
    known_city: Regex,
}

/// Cities recognized without a trailing state abbreviation.
const KNOWN_CITIES: &[&str] = &[
    "boston",
    "new york",
    "chicago",
    "seattle",
    "austin",
    "denver",
    "miami",
    "atlanta",
    "dallas",
    "portland",
];

impl SlotExtractor {
    pub fn new() -> Self {
        let cities = KNOWN_CITIES
            .iter()
            .map(|c| regex::escape(c))
            .collect::<Vec<_>>()
            .join("|");
        Self {
            order_number: Regex::new(r"(?i)\b(?:OD)?\d{7,12}\b").expect("order pattern"),
            zip_code: Regex::new(r"\b\d{5}(?:-\d{4})?\b").expect("zip pattern"),
            email: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                .expect("email pattern"),
            phone: Regex::new(r"\b(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b")
                .expect("phone pattern"),
            city_state: Regex::new(r"\b([A-Z][A-Za-z .'-]+?),\s*([A-Z]{2})\b")
                .expect("city-state pattern"),
            known_city: Regex::new(&format!(r"(?i)\b({cities})\b")).expect("city list pattern"),
        }
    }

    /// Extract candidates for every uncollected slot and merge them into
    /// `states` under the validation/attempt discipline.
    ///
    /// `pending` names the slot the assistant asked for on the previous
    /// turn, if any; for that slot the trimmed message itself is the
    /// fallback candidate.
    pub fn extract_into(
        &self,
        message: &str,
        defs: &[SlotDefinition],
        states: &mut [SlotEntry],
        pending: Option<&str>,
    ) -> Vec<Extraction> {
        let mut report = Vec::new();

        for def in defs {
            let Some(entry) = states.iter_mut().find(|e| e.name == def.name) else {
                continue;
            };
            if entry.state.collected {
                continue;
            }

            let candidate = self
                .well_known_candidate(def, message)
                .or_else(|| self.labeled_candidate(def, message))
                .or_else(|| {
                    if pending == Some(def.name.as_str()) {
                        let trimmed = message.trim();
                        (!trimmed.is_empty()).then(|| trimmed.to_owned())
                    } else {
                        None
                    }
                });

            if let Some(candidate) = candidate {
                let accepted = slots::apply_candidate(def, entry, &candidate);
                tracing::debug!(
                    slot = %def.name,
                    accepted,
                    attempts = entry.state.attempts,
                    "slot extraction"
                );
                report.push(Extraction {
                    slot: def.name.clone(),
                    candidate,
                    accepted,
                });
            }
        }

        report
    }

    /// Match a value shape implied by the slot name.
    fn well_known_candidate(&self, def: &SlotDefinition, message: &str) -> Option<String> {
        let name = def.name.as_str();
        if name.contains("order") {
            return self
                .order_number
                .find(message)
                .map(|m| m.as_str().to_owned());
        }
        if name.contains("zip") || name.contains("postal") {
            return self.zip_code.find(message).map(|m| m.as_str().to_owned());
        }
        if name.contains("email") {
            return self.email.find(message).map(|m| m.as_str().to_owned());
        }
        if name.contains("phone") {
            return self.phone.find(message).map(|m| m.as_str().to_owned());
        }
        if name.contains("state") {
            return self
                .city_state
                .captures(message)
                .map(|c| c[2].to_owned());
        }
        if name.contains("city") || name.contains("location") {
            if let Some(c) = self.city_state.captures(message) {
                return Some(c[1].trim().to_owned());
            }
            return self
                .known_city
                .find(message)
                .map(|m| m.as_str().to_owned());
        }
        None
    }

    /// Match `"<label> [is|:|=] <value>"` for the slot name or an alias.
    fn labeled_candidate(&self, def: &SlotDefinition, message: &str) -> Option<String> {
        let mut labels = vec![def.spoken_name()];
        labels.extend(def.aliases.iter().cloned());

        for label in labels {
            let pattern = format!(
                r"(?i)\b{}\s*(?:is|:|=)\s*([A-Za-z0-9@._+-]+)",
                regex::escape(&label)
            );
            let Ok(re) = Regex::new(&pattern) else {
                continue;
            };
            if let Some(c) = re.captures(message) {
                return Some(c[1].to_owned());
            }
        }
        None
    }
}

impl Default for SlotExtractor {
    fn default() -> Self {
        Self::new()
    }
}
