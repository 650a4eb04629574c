//! Stage C: the keyword prefilter.
//!
//! Cheap pattern scoring over the registry's precompiled indices. The
//! prefilter either settles the decision outright (one clear winner) or
//! narrows the candidate set the semantic stage embeds against.

use std::sync::Arc;

use sw_handlers::IndexedHandler;

/// Base score for keyword and whole-word regex matches.
const KEYWORD_BASE: f32 = 0.7;
/// Base score for prefix matches.
const PREFIX_BASE: f32 = 0.9;
/// Score for the handler's own name appearing in the message.
const NAME_MENTION_SCORE: f32 = 0.8;
/// Candidates below this score are dropped from the prefilter.
const CANDIDATE_MIN: f32 = 0.3;
/// A single candidate above this wins outright.
const SINGLE_WINNER_MIN: f32 = 0.8;
/// With several candidates: the top wins when it is at least this...
const CLEAR_LEADER_MIN: f32 = 0.9;
/// ...and leads the runner-up by more than this.
const CLEAR_LEADER_MARGIN: f32 = 0.3;

/// A prefilter candidate.
pub struct KeywordScore {
    pub handler: Arc<IndexedHandler>,
    pub score: f32,
}

/// Outcome of the keyword stage.
pub enum KeywordOutcome {
    /// One handler was a clear winner; routing is settled.
    Decided(KeywordScore),
    /// Plausible candidates for the semantic stage to rank.
    Candidates(Vec<KeywordScore>),
    /// Nothing scored; semantic stage searches the whole registry.
    NoMatches,
}

/// Score one handler's pattern set against a message. The handler's score
/// is the best of its matching patterns, capped at 1.0.
pub fn score_handler(handler: &IndexedHandler, message: &str, message_lower: &str) -> f32 {
    let mut best: f32 = 0.0;

    for (re, boost) in &handler.keywords {
        if re.is_match(message) {
            best = best.max((KEYWORD_BASE + boost).min(1.0));
        }
    }
    for (re, boost) in &handler.regexes {
        if re.is_match(message) {
            best = best.max((KEYWORD_BASE + boost).min(1.0));
        }
    }
    for (prefix, boost) in &handler.prefixes {
        if message_lower.starts_with(prefix.as_str()) {
            best = best.max((PREFIX_BASE + boost).min(1.0));
        }
    }

    // A literal mention of the handler's name ("talk to store locator").
    let name_lower = handler.def.name.to_lowercase();
    if message_lower.contains(&name_lower) || message_lower.contains(&spaced_name(&handler.def.name))
    {
        best = best.max(NAME_MENTION_SCORE);
    }

    best
}

/// Run the prefilter over all handlers and decide whether it settles.
pub fn prefilter(handlers: &[Arc<IndexedHandler>], message: &str) -> KeywordOutcome {
    let message_lower = message.to_lowercase();

    let mut candidates: Vec<KeywordScore> = handlers
        .iter()
        .map(|h| KeywordScore {
            handler: h.clone(),
            score: score_handler(h, message, &message_lower),
        })
        .filter(|c| c.score >= CANDIDATE_MIN)
        .collect();

    if candidates.is_empty() {
        return KeywordOutcome::NoMatches;
    }

    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let settled = match candidates.len() {
        1 => candidates[0].score > SINGLE_WINNER_MIN,
        _ => {
            candidates[0].score >= CLEAR_LEADER_MIN
                && candidates[0].score - candidates[1].score > CLEAR_LEADER_MARGIN
        }
    };

    if settled {
        let winner = candidates.remove(0);
        KeywordOutcome::Decided(winner)
    } else {
        KeywordOutcome::Candidates(candidates)
    }
}

/// "PackageTracking" → "package tracking", so spoken references match.
fn spaced_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            out.push(' ');
        }
        out.extend(c.to_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_handlers::{seed, HandlerRegistry};
    use sw_providers::mock::BagOfWordsEmbedder;

    async fn seeded() -> HandlerRegistry {
        let registry = HandlerRegistry::new();
        let embedder = BagOfWordsEmbedder::new();
        for def in seed::all() {
            registry.register(def, &embedder).await.unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn clear_keyword_match_is_decided() {
        let registry = seeded().await;
        let outcome = prefilter(&registry.all(), "where is my order OD1234567, zip 02108");
        match outcome {
            KeywordOutcome::Decided(winner) => {
                assert_eq!(winner.handler.def.name, "PackageTracking");
                assert!(winner.score >= 0.8, "score {}", winner.score);
            }
            _ => panic!("expected a decided outcome"),
        }
    }

    #[tokio::test]
    async fn prefix_scores_above_keyword() {
        let registry = seeded().await;
        let handler = registry.get_by_name("PackageTracking").unwrap();
        let msg = "where is my order";
        let score = score_handler(&handler, msg, msg);
        // Prefix base 0.9 + boost 0.1.
        assert!((score - 1.0).abs() < 1e-6, "score {score}");
    }

    #[tokio::test]
    async fn name_mention_scores_point_eight() {
        let registry = seeded().await;
        let handler = registry.get_by_name("StoreLocator").unwrap();
        let msg = "connect me with the store locator thing";
        // "store" keyword (0.9) also fires; strip it to isolate the name rule.
        let score = score_handler(&handler, msg, msg);
        assert!(score >= NAME_MENTION_SCORE);
    }

    #[tokio::test]
    async fn unrelated_message_has_no_matches() {
        let registry = seeded().await;
        let outcome = prefilter(&registry.all(), "tell me a joke");
        assert!(matches!(outcome, KeywordOutcome::NoMatches));
    }

    #[tokio::test]
    async fn ambiguous_messages_become_candidates() {
        let registry = seeded().await;
        // "order" (tracking) and "store" (locator) both fire near 0.85-0.9;
        // no clear leader, so the semantic stage decides.
        let outcome = prefilter(&registry.all(), "order pickup at the store");
        match outcome {
            KeywordOutcome::Candidates(c) => assert!(c.len() >= 2),
            _ => panic!("expected candidates"),
        }
    }

    #[test]
    fn spaced_name_splits_camel_case() {
        assert_eq!(spaced_name("PackageTracking"), "package tracking");
        assert_eq!(spaced_name("StoreLocator"), "store locator");
    }
}
