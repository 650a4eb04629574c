use serde::{Deserialize, Serialize};

/// Shared error type used across all Switchboard crates.
///
/// Every failure in the system is classified into exactly one variant; the
/// orchestrator is the only layer that maps variants to user-facing text.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("parse: {0}")]
    Parsing(String),

    #[error("JSON decode: {0}")]
    JsonDecode(String),

    #[error("handler not found: {0}")]
    HandlerNotFound(String),

    #[error("handler {handler}: {message}")]
    HandlerExecution { handler: String, message: String },

    #[error("handler timed out after {seconds}s")]
    HandlerTimeout { seconds: u64 },

    #[error("LLM API: {0}")]
    LlmApi(String),

    #[error("LLM rate limited: {0}")]
    LlmRateLimit(String),

    #[error("LLM context limit: {0}")]
    LlmContextLimit(String),

    #[error("database: {0}")]
    Db(String),

    #[error("memory: {0}")]
    Memory(String),

    #[error("state persistence: {0}")]
    StatePersistence(String),

    #[error("orchestration: {0}")]
    Orchestration(String),

    #[error("{0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The closed classification set. Serialized names are the wire-level
/// `error_type` strings returned to API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    MissingParameter,
    ParsingError,
    JsonDecodeError,
    HandlerNotFound,
    HandlerExecutionError,
    HandlerTimeout,
    LlmApiError,
    LlmRateLimit,
    LlmContextLimit,
    DbError,
    MemoryError,
    StatePersistenceError,
    OrchestrationError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::MissingParameter => "missing_parameter",
            Self::ParsingError => "parsing_error",
            Self::JsonDecodeError => "json_decode_error",
            Self::HandlerNotFound => "handler_not_found",
            Self::HandlerExecutionError => "handler_execution_error",
            Self::HandlerTimeout => "handler_timeout",
            Self::LlmApiError => "llm_api_error",
            Self::LlmRateLimit => "llm_rate_limit",
            Self::LlmContextLimit => "llm_context_limit",
            Self::DbError => "db_error",
            Self::MemoryError => "memory_error",
            Self::StatePersistenceError => "state_persistence_error",
            Self::OrchestrationError => "orchestration_error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error into the closed taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::MissingParameter(_) => ErrorKind::MissingParameter,
            Self::Parsing(_) => ErrorKind::ParsingError,
            Self::JsonDecode(_) => ErrorKind::JsonDecodeError,
            Self::HandlerNotFound(_) => ErrorKind::HandlerNotFound,
            Self::HandlerExecution { .. } => ErrorKind::HandlerExecutionError,
            Self::HandlerTimeout { .. } => ErrorKind::HandlerTimeout,
            Self::LlmApi(_) => ErrorKind::LlmApiError,
            Self::LlmRateLimit(_) => ErrorKind::LlmRateLimit,
            Self::LlmContextLimit(_) => ErrorKind::LlmContextLimit,
            Self::Db(_) => ErrorKind::DbError,
            Self::Memory(_) => ErrorKind::MemoryError,
            Self::StatePersistence(_) => ErrorKind::StatePersistenceError,
            Self::Orchestration(_) => ErrorKind::OrchestrationError,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether a retry with backoff is worthwhile for this error.
    ///
    /// Rate limits clear on their own; storage errors are assumed
    /// transient. Context-limit errors never retry: the prompt will not
    /// shrink by waiting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::LlmRateLimit | ErrorKind::DbError | ErrorKind::StatePersistenceError
        )
    }

    /// Whether this is a transient storage failure the resilient session
    /// store should absorb rather than surface.
    pub fn is_storage_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DbError | ErrorKind::StatePersistenceError
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::JsonDecode(e.to_string())
    }
}
