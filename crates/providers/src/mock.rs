//! In-memory provider doubles for tests.
//!
//! `BagOfWordsEmbedder` is deterministic and reflects word overlap in
//! cosine space, which is exactly what router tests need. `ScriptedLlm`
//! replays a queue of canned results, including injected failures.

use std::collections::VecDeque;

use parking_lot::Mutex;

use sw_domain::error::{Error, Result};

use crate::traits::{CompletionRequest, EmbeddingProvider, LlmProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deterministic embedder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hash-bucketed bag-of-words embedder. Texts sharing words land on the
/// same buckets, so cosine similarity tracks lexical overlap.
pub struct BagOfWordsEmbedder {
    dims: usize,
}

impl BagOfWordsEmbedder {
    pub fn new() -> Self {
        Self { dims: 64 }
    }
}

impl Default for BagOfWordsEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for BagOfWordsEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vec = vec![0.0f32; self.dims];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let idx = (hash_word(word) as usize) % self.dims;
            vec[idx] += 1.0;
        }
        Ok(vec)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

fn hash_word(word: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    word.hash(&mut hasher);
    hasher.finish()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted completion provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Scripted {
    Text(String),
    RateLimit,
    ContextLimit,
    ApiError(String),
}

/// Replays canned completion results in order; when the script is
/// exhausted it echoes the prompt (handy as a do-nothing default).
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Scripted>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.script.lock().push_back(Scripted::Text(text.into()));
        self
    }

    pub fn then_rate_limit(self) -> Self {
        self.script.lock().push_back(Scripted::RateLimit);
        self
    }

    pub fn then_context_limit(self) -> Self {
        self.script.lock().push_back(Scripted::ContextLimit);
        self
    }

    pub fn then_api_error(self, msg: impl Into<String>) -> Self {
        self.script.lock().push_back(Scripted::ApiError(msg.into()));
        self
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, req: CompletionRequest) -> Result<String> {
        match self.script.lock().pop_front() {
            Some(Scripted::Text(t)) => Ok(t),
            Some(Scripted::RateLimit) => Err(Error::LlmRateLimit("scripted 429".into())),
            Some(Scripted::ContextLimit) => {
                Err(Error::LlmContextLimit("scripted context overflow".into()))
            }
            Some(Scripted::ApiError(m)) => Err(Error::LlmApi(m)),
            None => Ok(req.prompt),
        }
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

/// A provider that rate-limits on every call, for worst-case tests.
pub struct AlwaysRateLimitedLlm;

#[async_trait::async_trait]
impl LlmProvider for AlwaysRateLimitedLlm {
    async fn complete(&self, _req: CompletionRequest) -> Result<String> {
        Err(Error::LlmRateLimit("synthetic 429".into()))
    }

    fn provider_id(&self) -> &str {
        "always-rate-limited"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cosine_similarity;

    #[tokio::test]
    async fn overlapping_texts_are_similar() {
        let embedder = BagOfWordsEmbedder::new();
        let a = embedder.embed("where is my package order").await.unwrap();
        let b = embedder.embed("track my package order status").await.unwrap();
        let c = embedder.embed("reset forgotten login password").await.unwrap();

        let sim_ab = cosine_similarity(&a, &b);
        let sim_ac = cosine_similarity(&a, &c);
        assert!(
            sim_ab > sim_ac,
            "package/package should beat package/password: {sim_ab} vs {sim_ac}"
        );
    }

    #[tokio::test]
    async fn embedding_is_deterministic() {
        let embedder = BagOfWordsEmbedder::new();
        let a = embedder.embed("hello world").await.unwrap();
        let b = embedder.embed("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn scripted_llm_replays_in_order() {
        let llm = ScriptedLlm::new()
            .then_text("first")
            .then_rate_limit()
            .then_text("second");

        assert_eq!(
            llm.complete(CompletionRequest::new("p")).await.unwrap(),
            "first"
        );
        assert!(llm.complete(CompletionRequest::new("p")).await.is_err());
        assert_eq!(
            llm.complete(CompletionRequest::new("p")).await.unwrap(),
            "second"
        );
        // Exhausted script echoes the prompt.
        assert_eq!(
            llm.complete(CompletionRequest::new("echo")).await.unwrap(),
            "echo"
        );
    }
}
