use sw_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic completion request.
///
/// The core produces responses per full turn, so there is no streaming
/// variant: `complete` returns the whole text.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// System framing for the call (persona, template instructions).
    pub system: Option<String>,
    /// The user-visible prompt body.
    pub prompt: String,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// When `true`, ask the model to respond with valid JSON only.
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Text-completion seam. Implementations translate to a concrete HTTP API;
/// tests use scripted doubles from [`crate::mock`].
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a completion request and wait for the full response text.
    async fn complete(&self, req: CompletionRequest) -> Result<String>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

/// Embedding seam. Vectors are fixed-dimension per provider instance.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// The dimensionality of vectors this provider produces.
    fn dimensions(&self) -> usize;
}
