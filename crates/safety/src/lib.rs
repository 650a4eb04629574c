//! Content-safety passes applied around every handler.
//!
//! Two independent passes: the **input pass** detects out-of-scope topics
//! before routing; the **output pass** substitutes persona-breaking
//! phrases and records sensitive-data / prohibited-topic violations on the
//! turn. Rule tables are compiled once at startup and never mutated, so
//! the filter is shared freely across workers.

use chrono::{DateTime, Utc};
use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};

use sw_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Violations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Med,
    High,
}

/// A recorded rule violation. Violations are data attached to the turn;
/// escalation decisions belong to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub rule: String,
    pub severity: Severity,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl Violation {
    fn new(rule: &str, severity: Severity, description: String) -> Self {
        TraceEvent::SafetyViolation {
            rule: rule.to_owned(),
            severity: format!("{severity:?}").to_lowercase(),
        }
        .emit();
        Self {
            rule: rule.to_owned(),
            severity,
            description,
            timestamp: Utc::now(),
        }
    }
}

/// Rule names, shared with the executor's escalation logic.
pub const RULE_BANNED_PHRASE: &str = "banned_phrase";
pub const RULE_SENSITIVE_INFORMATION: &str = "sensitive_information";
pub const RULE_PROHIBITED_TOPIC: &str = "prohibited_topic";
pub const RULE_SERVICE_BOUNDARY: &str = "service_boundary";

/// Verdict of the input pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputVerdict {
    pub out_of_scope: bool,
    pub category: Option<String>,
}

impl InputVerdict {
    fn in_scope() -> Self {
        Self {
            out_of_scope: false,
            category: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rule tables
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Phrases that break the assistant persona. Any occurrence is replaced
/// by [`REPRESENTATIVE_PHRASE`].
const BANNED_PHRASES: &[&str] = &[
    "I'm just an AI",
    "As an AI",
    "I'm an AI language model",
    "I'm not a human",
    "I'm not a real customer service representative",
    "I cannot access",
];

/// Substituted for any banned phrase. Must itself be clean under every
/// output rule so the pass is a fixed point.
const REPRESENTATIVE_PHRASE: &str = "As a customer care representative";

const OUT_OF_SCOPE_TOPICS: &[(&str, &[&str])] = &[
    (
        "hiring",
        &[
            "job application",
            "hiring",
            "employment",
            "job opening",
            "career",
            "apply for job",
            "job interview",
            "resume",
        ],
    ),
    (
        "hr_policies",
        &[
            "sick leave",
            "vacation policy",
            "employee benefits",
            "hr policies",
            "employee handbook",
            "maternity leave",
            "paternity leave",
        ],
    ),
    (
        "legal",
        &[
            "lawsuit",
            "legal action",
            "settlement",
            "terms of service",
            "privacy policy",
            "gdpr",
            "legal department",
        ],
    ),
    (
        "executive",
        &[
            "ceo",
            "cfo",
            "executive team",
            "board of directors",
            "quarterly results",
            "annual report",
            "investor relations",
        ],
    ),
    (
        "investments",
        &[
            "stock price",
            "investment advice",
            "market share",
            "shareholders",
            "dividend",
            "market cap",
            "ipo",
        ],
    ),
    (
        "unrelated",
        &[
            "personal advice",
            "personal questions",
            "private matters",
            "other companies",
        ],
    ),
];

const PROHIBITED_TOPICS: &[(&str, &[&str])] = &[
    (
        "political",
        &["election", "politics", "political party", "vote"],
    ),
    ("religious", &["religion", "atheist"]),
    ("adult", &["explicit", "adult content"]),
    (
        "illegal",
        &["hack", "steal", "illegal download", "pirate software"],
    ),
];

const DISALLOWED_SERVICES: &[&str] = &[
    "refund processing",
    "cancel subscription",
    "create new account",
    "delete account",
    "file complaint",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct TopicRules {
    category: String,
    set: RegexSet,
}

/// The content-safety filter. Stateless after construction.
pub struct SafetyFilter {
    out_of_scope: Vec<TopicRules>,
    prohibited: Vec<TopicRules>,
    services: TopicRules,
    sensitive: Vec<(String, Regex)>,
}

impl SafetyFilter {
    pub fn new() -> Self {
        let out_of_scope = OUT_OF_SCOPE_TOPICS
            .iter()
            .map(|(cat, words)| compile_topic(cat, words))
            .collect();
        let prohibited = PROHIBITED_TOPICS
            .iter()
            .map(|(cat, words)| compile_topic(cat, words))
            .collect();
        let services = compile_topic("service", DISALLOWED_SERVICES);

        let sensitive = vec![
            (
                "credit_card".to_owned(),
                Regex::new(r"\b(?:\d{4}[-\s]?){3}\d{4}\b").expect("credit card pattern"),
            ),
            (
                "ssn".to_owned(),
                Regex::new(r"\b\d{3}[-\s]?\d{2}[-\s]?\d{4}\b").expect("ssn pattern"),
            ),
            (
                "full_password".to_owned(),
                Regex::new(r"(?i)\b(password is|password:|password =)\s*\S+")
                    .expect("password pattern"),
            ),
        ];

        Self {
            out_of_scope,
            prohibited,
            services,
            sensitive,
        }
    }

    // ── Input pass ─────────────────────────────────────────────────

    /// Check whether a user message is out of scope for the handler pool.
    /// Exact whole-word matching, case-insensitive.
    pub fn input_pass(&self, text: &str) -> InputVerdict {
        for topic in &self.out_of_scope {
            if topic.set.is_match(text) {
                return InputVerdict {
                    out_of_scope: true,
                    category: Some(topic.category.clone()),
                };
            }
        }
        InputVerdict::in_scope()
    }

    // ── Output pass ────────────────────────────────────────────────

    /// Sanitize a response and record violations.
    ///
    /// Banned phrases are substituted (high). Sensitive-data patterns are
    /// recorded but not redacted; escalation is the caller's job (high).
    /// Prohibited topics and disallowed services are recorded (medium).
    pub fn output_pass(&self, text: &str) -> (String, Vec<Violation>) {
        let mut violations = Vec::new();
        let mut sanitized = text.to_owned();

        for phrase in BANNED_PHRASES {
            let replaced = replace_case_insensitive(&sanitized, phrase, REPRESENTATIVE_PHRASE);
            if replaced != sanitized {
                violations.push(Violation::new(
                    RULE_BANNED_PHRASE,
                    Severity::High,
                    format!("response contained banned phrase '{phrase}'"),
                ));
                sanitized = replaced;
            }
        }

        for (name, pattern) in &self.sensitive {
            if pattern.is_match(&sanitized) {
                violations.push(Violation::new(
                    RULE_SENSITIVE_INFORMATION,
                    Severity::High,
                    format!("response contains sensitive data pattern: {name}"),
                ));
            }
        }

        for topic in &self.prohibited {
            if topic.set.is_match(&sanitized) {
                violations.push(Violation::new(
                    RULE_PROHIBITED_TOPIC,
                    Severity::Med,
                    format!("response discusses prohibited topic: {}", topic.category),
                ));
            }
        }

        if self.services.set.is_match(&sanitized) {
            violations.push(Violation::new(
                RULE_SERVICE_BOUNDARY,
                Severity::Med,
                "response offers a disallowed service".to_owned(),
            ));
        }

        (sanitized, violations)
    }

    /// Segments of `text` matching a sensitive-data pattern, for the
    /// executor's suppression step.
    pub fn sensitive_segments(&self, text: &str) -> Vec<(usize, usize)> {
        let mut spans: Vec<(usize, usize)> = Vec::new();
        for (_, pattern) in &self.sensitive {
            for m in pattern.find_iter(text) {
                spans.push((m.start(), m.end()));
            }
        }
        spans.sort_unstable();
        spans
    }
}

impl Default for SafetyFilter {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn compile_topic(category: &str, words: &[&str]) -> TopicRules {
    let patterns: Vec<String> = words
        .iter()
        .map(|w| format!(r"(?i)\b{}\b", regex::escape(w)))
        .collect();
    TopicRules {
        category: category.to_owned(),
        set: RegexSet::new(&patterns).expect("topic keyword patterns"),
    }
}

/// Replace every case-insensitive occurrence of `needle` in `haystack`.
fn replace_case_insensitive(haystack: &str, needle: &str, replacement: &str) -> String {
    let lower_haystack = haystack.to_lowercase();
    let lower_needle = needle.to_lowercase();
    if lower_needle.is_empty() {
        return haystack.to_owned();
    }

    let mut out = String::with_capacity(haystack.len());
    let mut cursor = 0;
    while let Some(pos) = lower_haystack[cursor..].find(&lower_needle) {
        let start = cursor + pos;
        // Byte offsets are safe: lowercase of ASCII rule text preserves
        // lengths, and match positions on non-ASCII input fall on char
        // boundaries of the lowercased haystack mirror.
        out.push_str(&haystack[cursor..start]);
        out.push_str(replacement);
        cursor = start + lower_needle.len();
    }
    out.push_str(&haystack[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── input pass ────────────────────────────────────────────────

    #[test]
    fn in_scope_message_passes() {
        let filter = SafetyFilter::new();
        let verdict = filter.input_pass("where is my order OD1234567?");
        assert!(!verdict.out_of_scope);
        assert_eq!(verdict.category, None);
    }

    #[test]
    fn hiring_question_is_out_of_scope() {
        let filter = SafetyFilter::new();
        let verdict = filter.input_pass("How do I submit a job application?");
        assert!(verdict.out_of_scope);
        assert_eq!(verdict.category.as_deref(), Some("hiring"));
    }

    #[test]
    fn matching_is_whole_word() {
        let filter = SafetyFilter::new();
        // "careers" should not match the keyword "career"... but "career"
        // embedded in another word must not fire either.
        let verdict = filter.input_pass("I bought a careertools workbook");
        assert!(!verdict.out_of_scope);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let filter = SafetyFilter::new();
        let verdict = filter.input_pass("WHAT IS YOUR STOCK PRICE");
        assert!(verdict.out_of_scope);
        assert_eq!(verdict.category.as_deref(), Some("investments"));
    }

    // ── output pass ───────────────────────────────────────────────

    #[test]
    fn banned_phrase_is_substituted_and_recorded() {
        let filter = SafetyFilter::new();
        let (text, violations) =
            filter.output_pass("I'm just an AI, so I can't help with that.");
        assert!(text.starts_with(REPRESENTATIVE_PHRASE));
        assert!(!text.contains("I'm just an AI"));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, RULE_BANNED_PHRASE);
        assert_eq!(violations[0].severity, Severity::High);
    }

    #[test]
    fn substitution_is_case_insensitive() {
        let filter = SafetyFilter::new();
        let (text, violations) = filter.output_pass("as an ai, I have limits.");
        assert!(!text.to_lowercase().contains("as an ai,"));
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn output_pass_is_idempotent() {
        let filter = SafetyFilter::new();
        let (once, _) =
            filter.output_pass("As an AI I must say your card 4111 1111 1111 1111 is on file.");
        let (twice, _) = filter.output_pass(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn credit_card_recorded_but_not_redacted() {
        let filter = SafetyFilter::new();
        let (text, violations) = filter.output_pass("Your card 4111-1111-1111-1111 was charged.");
        assert!(text.contains("4111-1111-1111-1111"));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, RULE_SENSITIVE_INFORMATION);
        assert_eq!(violations[0].severity, Severity::High);
    }

    #[test]
    fn ssn_and_password_detected() {
        let filter = SafetyFilter::new();
        let (_, v1) = filter.output_pass("SSN 123-45-6789 on record");
        assert!(v1.iter().any(|v| v.rule == RULE_SENSITIVE_INFORMATION));

        let (_, v2) = filter.output_pass("your password is hunter2");
        assert!(v2.iter().any(|v| v.rule == RULE_SENSITIVE_INFORMATION));
    }

    #[test]
    fn prohibited_topic_is_medium() {
        let filter = SafetyFilter::new();
        let (_, violations) = filter.output_pass("Let's discuss the election results.");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, RULE_PROHIBITED_TOPIC);
        assert_eq!(violations[0].severity, Severity::Med);
    }

    #[test]
    fn disallowed_service_is_medium() {
        let filter = SafetyFilter::new();
        let (_, violations) = filter.output_pass("I can start refund processing for you.");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, RULE_SERVICE_BOUNDARY);
    }

    #[test]
    fn clean_text_has_no_violations() {
        let filter = SafetyFilter::new();
        let (text, violations) =
            filter.output_pass("Your order OD1234567 arrives Thursday.");
        assert_eq!(text, "Your order OD1234567 arrives Thursday.");
        assert!(violations.is_empty());
    }

    #[test]
    fn sensitive_segments_are_located() {
        let filter = SafetyFilter::new();
        let text = "card 4111 1111 1111 1111 ok";
        let spans = filter.sensitive_segments(text);
        assert_eq!(spans.len(), 1);
        let (start, end) = spans[0];
        assert_eq!(&text[start..end], "4111 1111 1111 1111");
    }

    #[test]
    fn severity_serializes_to_spec_values() {
        assert_eq!(serde_json::to_string(&Severity::Med).unwrap(), "\"med\"");
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
    }
}
