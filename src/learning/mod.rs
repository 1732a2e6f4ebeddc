//! Learning Stores (C9): five cross-cutting stores that read from and write
//! to the agent loop, all in-process with optional JSON persistence on task
//! boundary (§4.9, §6.4).
//!
//! All stores are append-mostly; the only mutations are metric updates and
//! version revisions (§4.9). They are process-wide and may be read by
//! multiple tasks concurrently — each store takes its own short exclusive
//! lock on writes and hands out snapshot-consistent reads, per §5's
//! shared-resource policy.

pub mod error_patterns;
pub mod interaction_log;
pub mod knowledge_hub;
pub mod performance;
pub mod persistence;
pub mod strategy;

pub use error_patterns::ErrorPatternStore;
pub use interaction_log::{Interaction, InteractionLog};
pub use knowledge_hub::{KnowledgeHub, KnowledgeItem, Priority};
pub use performance::PerformanceOptimizer;
pub use persistence::LearningSnapshot;
pub use strategy::{AdaptiveStrategy, Complexity, StrategyAnalysis};

/// Jaccard similarity over whitespace-tokenized, lowercased text. Shared by
/// the interaction log (tag overlap), the error-pattern store (message
/// word-sets), and adaptive strategy (keyword-set nearest-neighbor), per
/// §4.9's matching rules.
pub fn jaccard(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;

    let tokenize = |s: &str| -> HashSet<String> {
        s.to_lowercase()
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|w| !w.is_empty())
            .collect()
    };

    let sa = tokenize(a);
    let sb = tokenize(b);
    if sa.is_empty() && sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_identical_is_one() {
        assert_eq!(jaccard("build the api", "build the api"), 1.0);
    }

    #[test]
    fn jaccard_disjoint_is_zero() {
        assert_eq!(jaccard("build the api", "delete old cache"), 0.0);
    }

    #[test]
    fn jaccard_partial_overlap() {
        let score = jaccard("build a rest api", "build a graphql api");
        assert!(score > 0.0 && score < 1.0);
    }
}
