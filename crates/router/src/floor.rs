//! The session-dynamic confidence floor.
//!
//! The floor starts at the default threshold, relaxes after the router
//! fails to match twice in a row (the user is probably rephrasing), and
//! tightens for the turn following negative feedback (a marginal match
//! just burned trust). The per-handler floor is combined in at decision
//! time.

use sw_domain::config::RoutingConfig;

/// Consecutive no-match turns before the floor relaxes.
const RELAX_AFTER_MISSES: u32 = 2;

/// The session-dynamic part of the floor.
pub fn dynamic_floor(config: &RoutingConfig, no_match_streak: u32, negative_feedback: bool) -> f32 {
    if negative_feedback {
        config.max_confidence_threshold
    } else if no_match_streak >= RELAX_AFTER_MISSES {
        config.min_confidence_threshold
    } else {
        config.default_confidence_threshold
    }
}

/// The floor a decision for `handler_floor` must clear.
pub fn effective_floor(handler_floor: f32, dynamic: f32) -> f32 {
    handler_floor.max(dynamic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_default() {
        let config = RoutingConfig::default();
        assert_eq!(dynamic_floor(&config, 0, false), 0.65);
        assert_eq!(dynamic_floor(&config, 1, false), 0.65);
    }

    #[test]
    fn relaxes_after_two_misses() {
        let config = RoutingConfig::default();
        assert_eq!(dynamic_floor(&config, 2, false), 0.5);
        assert_eq!(dynamic_floor(&config, 7, false), 0.5);
    }

    #[test]
    fn negative_feedback_wins_over_misses() {
        let config = RoutingConfig::default();
        assert_eq!(dynamic_floor(&config, 3, true), 0.8);
    }

    #[test]
    fn handler_floor_combines_by_max() {
        assert_eq!(effective_floor(0.5, 0.65), 0.65);
        assert_eq!(effective_floor(0.9, 0.65), 0.9);
    }
}
