//! Provider seams for the two opaque external services the core consumes:
//! text completion (`LlmProvider`) and text embedding (`EmbeddingProvider`),
//! plus the process-wide embedding cache and the vector math used by the
//! router.

pub mod cache;
pub mod http;
pub mod mock;
pub mod traits;
pub mod vector;

pub use cache::EmbeddingCache;
pub use traits::{CompletionRequest, EmbeddingProvider, LlmProvider};
pub use vector::cosine_similarity;
