//! Stage A: special-case classification.
//!
//! Greetings, farewells, transfer-to-human requests, and negative
//! feedback are recognized before any handler scoring. Anchored regexes
//! decide the obvious phrasings; everything else gets a short semantic
//! check against per-category exemplar utterances.

use regex::Regex;

use sw_domain::error::Result;
use sw_providers::{cosine_similarity, EmbeddingCache, EmbeddingProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Categories
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialCategory {
    Greeting,
    Farewell,
    HumanTransfer,
    NegativeFeedback,
}

impl SpecialCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Farewell => "farewell",
            Self::HumanTransfer => "human_transfer",
            Self::NegativeFeedback => "negative_feedback",
        }
    }
}

/// A classified special case with its confidence.
#[derive(Debug, Clone, Copy)]
pub struct SpecialCase {
    pub category: SpecialCategory,
    pub confidence: f32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Exemplars & rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Confidence assigned to an anchored regex hit.
const REGEX_CONFIDENCE: f32 = 0.95;
/// Minimum exemplar similarity to classify semantically.
const EXEMPLAR_MIN_SIMILARITY: f32 = 0.8;

const EXEMPLARS: &[(SpecialCategory, &[&str])] = &[
    (
        SpecialCategory::Greeting,
        &["hi there", "hello", "hey, good morning", "hi, how are you"],
    ),
    (
        SpecialCategory::Farewell,
        &["goodbye", "bye for now", "thanks, that's all", "see you later"],
    ),
    (
        SpecialCategory::HumanTransfer,
        &[
            "let me talk to a real person",
            "transfer me to an agent",
            "I want to speak with a human representative",
        ],
    ),
    (
        SpecialCategory::NegativeFeedback,
        &[
            "that's not what I asked",
            "this answer is wrong",
            "you're not being helpful",
        ],
    ),
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classifier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SpecialCaseClassifier {
    greeting: Regex,
    farewell: Regex,
    human_transfer: Regex,
    negative_feedback: Regex,
}

impl SpecialCaseClassifier {
    pub fn new() -> Self {
        Self {
            greeting: Regex::new(
                r"(?i)^\s*(hi|hii+|hello|hey|howdy|greetings|yo|good\s+(morning|afternoon|evening))\b",
            )
            .expect("greeting pattern"),
            farewell: Regex::new(
                r"(?i)\b(bye|goodbye|farewell|see\s+you|that('|i)s\s+all|thanks,?\s+bye)\b",
            )
            .expect("farewell pattern"),
            human_transfer: Regex::new(
                r"(?i)\b((speak|talk)\s+(to|with)\s+(a\s+|an\s+)?(human|person|agent|representative|someone)|human\s+agent|real\s+person|transfer\s+me)\b",
            )
            .expect("human transfer pattern"),
            negative_feedback: Regex::new(
                r"(?i)\b(not\s+helpful|wrong\s+answer|that('|i)s\s+(wrong|not\s+right|not\s+what\s+I\s+asked)|useless|didn('|i)t\s+help|bad\s+answer)\b",
            )
            .expect("negative feedback pattern"),
        }
    }

    /// Classify a message, trying regexes first and falling back to the
    /// exemplar similarity check. Returns `None` for ordinary messages.
    pub async fn classify(
        &self,
        message: &str,
        embedder: &dyn EmbeddingProvider,
        cache: &EmbeddingCache,
    ) -> Result<Option<SpecialCase>> {
        if let Some(category) = self.regex_category(message) {
            return Ok(Some(SpecialCase {
                category,
                confidence: REGEX_CONFIDENCE,
            }));
        }

        // Short semantic check. Only worth running on short messages;
        // long messages with a greeting buried inside are real requests.
        if word_count(message) > 12 {
            return Ok(None);
        }

        let message_vec = embed_cached(message, embedder, cache).await?;
        let mut best: Option<SpecialCase> = None;
        for (category, exemplars) in EXEMPLARS {
            for exemplar in *exemplars {
                let exemplar_vec = embed_cached(exemplar, embedder, cache).await?;
                let sim = cosine_similarity(&message_vec, &exemplar_vec);
                if sim >= EXEMPLAR_MIN_SIMILARITY
                    && best.map(|b| sim > b.confidence).unwrap_or(true)
                {
                    best = Some(SpecialCase {
                        category: *category,
                        confidence: sim,
                    });
                }
            }
        }
        Ok(best)
    }

    fn regex_category(&self, message: &str) -> Option<SpecialCategory> {
        // Order matters: a "no, that's wrong, bye" leans feedback, and
        // transfer requests trump greetings ("hi, get me a human").
        if self.negative_feedback.is_match(message) {
            Some(SpecialCategory::NegativeFeedback)
        } else if self.human_transfer.is_match(message) {
            Some(SpecialCategory::HumanTransfer)
        } else if self.farewell.is_match(message) {
            Some(SpecialCategory::Farewell)
        } else if self.greeting.is_match(message) {
            Some(SpecialCategory::Greeting)
        } else {
            None
        }
    }
}

impl Default for SpecialCaseClassifier {
    fn default() -> Self {
        Self::new()
    }
}

async fn embed_cached(
    text: &str,
    embedder: &dyn EmbeddingProvider,
    cache: &EmbeddingCache,
) -> Result<Vec<f32>> {
    if let Some(hit) = cache.get(text) {
        return Ok(hit);
    }
    let vec = embedder.embed(text).await?;
    cache.put(text, vec.clone());
    Ok(vec)
}

pub fn word_count(message: &str) -> usize {
    message.split_whitespace().count()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canned replies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const GREETING_REPLIES: &[&str] = &[
    "Hello! How can I help you today?",
    "Hi there! What can I do for you?",
    "Hello! I can help with orders, deliveries, stores and account questions.",
];

const FAREWELL_REPLIES: &[&str] = &[
    "Thanks for stopping by. Have a great day!",
    "Goodbye! Reach out any time you need a hand.",
];

const HUMAN_TRANSFER_REPLIES: &[&str] = &[
    "Of course, I'm connecting you with a human representative now.",
    "No problem, let me hand you over to a member of our team.",
];

const NEGATIVE_FEEDBACK_REPLIES: &[&str] = &[
    "I'm sorry that missed the mark. Could you tell me a bit more about what you need?",
];

/// Deterministic canned reply for a category: same message, same reply.
pub fn canned_reply(category: SpecialCategory, message: &str) -> &'static str {
    let pool = match category {
        SpecialCategory::Greeting => GREETING_REPLIES,
        SpecialCategory::Farewell => FAREWELL_REPLIES,
        SpecialCategory::HumanTransfer => HUMAN_TRANSFER_REPLIES,
        SpecialCategory::NegativeFeedback => NEGATIVE_FEEDBACK_REPLIES,
    };
    let idx = (hash_message(message) as usize) % pool.len();
    pool[idx]
}

fn hash_message(message: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    message.hash(&mut hasher);
    hasher.finish()
}
