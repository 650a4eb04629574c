//! Deterministic user-facing texts.
//!
//! One message per error category. Nothing from an internal error or
//! stack trace ever reaches the user. The orchestrator is the only layer
//! that performs this mapping.

use sw_domain::ErrorKind;

/// Response when routing finds no suitable handler.
pub const FALLBACK_NO_MATCH: &str =
    "I'm not sure I can help with that one. I can help with orders, deliveries, stores, and account questions.";

/// Response when the registry is empty.
pub const FALLBACK_NO_HANDLERS: &str =
    "No specialists are available right now. Please try again shortly.";

/// Response when the global inflight limit is reached.
pub const OVERLOADED: &str =
    "We're handling a lot of requests right now. Please try again shortly.";

/// Generic redirect when an out-of-scope message has no handler template.
pub const OUT_OF_SCOPE_REDIRECT: &str =
    "That's outside what I can help with here. I can help with orders, deliveries, stores, and account questions.";

/// Appended when a response had to drop a sensitive-data segment.
pub const SENSITIVE_DATA_FOLLOW_UP: &str =
    "I've removed some sensitive details. Let's continue without sharing things like card numbers.";

/// Default handoff when a handler declares no `handoff` template.
pub const DEFAULT_HANDOFF: &str =
    "I wasn't able to gather everything I need. Let me connect you with a specialist who can help.";

/// The user-facing message for an error category.
pub fn user_message_for(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::LlmRateLimit => {
            "I'm experiencing a lot of traffic right now. Please try again in a moment."
        }
        ErrorKind::LlmContextLimit => {
            "Our conversation has become too detailed for me to follow. Could we start over with just the key details?"
        }
        ErrorKind::LlmApiError => {
            "I'm having trouble reaching my reasoning service. Please try again in a moment."
        }
        ErrorKind::HandlerTimeout => {
            "I'm sorry, that took longer than expected. Please try again."
        }
        ErrorKind::HandlerNotFound => FALLBACK_NO_MATCH,
        ErrorKind::HandlerExecutionError => {
            "Something went wrong while working on that. Please try again."
        }
        ErrorKind::InvalidInput | ErrorKind::MissingParameter => {
            "I didn't catch that. Could you rephrase your request?"
        }
        ErrorKind::ParsingError | ErrorKind::JsonDecodeError => {
            "I had trouble putting that answer together. Please try again."
        }
        ErrorKind::DbError | ErrorKind::MemoryError | ErrorKind::StatePersistenceError => {
            "I'm having trouble saving our conversation, but I can keep helping you."
        }
        ErrorKind::OrchestrationError | ErrorKind::Unknown => {
            "Something went wrong on my end. Please try again."
        }
    }
}
