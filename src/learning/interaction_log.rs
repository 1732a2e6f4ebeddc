//! Interaction Log (§4.9.1): appends a record per completed (sub-)task and
//! extracts **Learnings** from recurring outcomes.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::jaccard;

/// Tag-overlap threshold above which two interactions are considered to
/// describe the same recurring situation (§4.9.1).
const TAG_OVERLAP_THRESHOLD: f64 = 0.5;
/// Minimum matching prior records before a learning is created/incremented.
const MIN_MATCHES_FOR_LEARNING: usize = 3;

/// One completed (sub-)task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub agent_kind: String,
    pub description: String,
    pub success: bool,
    pub duration_ms: i64,
    pub iterations_used: usize,
    pub error_count: usize,
    /// Tools invoked, in dispatch order.
    #[serde(default)]
    pub actions: Vec<String>,
    /// Each action's outcome, aligned by index with `actions`.
    #[serde(default)]
    pub results: Vec<String>,
    /// Tags extracted from `description` for later tag-overlap matching.
    #[serde(default)]
    pub tags: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Confidence tiers assigned by occurrence count (§4.9.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
    VeryHigh,
}

fn confidence_for_count(count: u32) -> Confidence {
    if count >= 15 {
        Confidence::VeryHigh
    } else if count >= 7 {
        Confidence::High
    } else if count >= 3 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// A recognized recurring outcome, derived from ≥3 similar interactions
/// sharing an outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub id: String,
    pub summary: String,
    pub success: bool,
    pub occurrence_count: u32,
    pub confidence: Confidence,
    pub success_rate: f64,
    /// Ids of the interactions this learning was derived from.
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Keyword extraction over `description` (§3 Interaction Record's
/// `extracted tags`): lowercased, alphanumeric words longer than three
/// characters, deduplicated in first-seen order.
pub fn extract_tags(description: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    description
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| w.len() > 3 && seen.insert(w.clone()))
        .collect()
}

#[derive(Default)]
struct State {
    interactions: Vec<Interaction>,
    learnings: Vec<Learning>,
}

/// Append-only log of completed interactions plus the learnings derived
/// from them.
pub struct InteractionLog {
    state: RwLock<State>,
}

impl Default for InteractionLog {
    fn default() -> Self {
        Self { state: RwLock::new(State::default()) }
    }
}

impl InteractionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `interaction` then runs learning extraction (§4.9.1): if it
    /// matches (tag overlap ≥ 0.5) at least 3 prior records with the same
    /// outcome, a learning is created or its occurrence count is
    /// incremented and its confidence/success-rate recomputed. Returns the
    /// affected learning, if any, so callers can surface it as an event.
    pub fn record(&self, mut interaction: Interaction) -> Option<Learning> {
        if interaction.tags.is_empty() {
            interaction.tags = extract_tags(&interaction.description);
        }

        let mut state = self.state.write().expect("lock");

        let matches: Vec<&Interaction> = state
            .interactions
            .iter()
            .filter(|prior| {
                prior.success == interaction.success
                    && jaccard(&prior.description, &interaction.description) >= TAG_OVERLAP_THRESHOLD
            })
            .collect();
        let match_count = matches.len();
        let successes = matches.iter().filter(|m| m.success).count();
        let mut evidence: Vec<String> = matches.iter().map(|m| m.id.clone()).collect();
        evidence.push(interaction.id.clone());

        state.interactions.push(interaction.clone());

        if match_count + 1 >= MIN_MATCHES_FOR_LEARNING {
            let summary = interaction.description.clone();
            let success = interaction.success;
            let existing = state
                .learnings
                .iter_mut()
                .find(|l| l.success == success && jaccard(&l.summary, &summary) >= TAG_OVERLAP_THRESHOLD);

            let total = match_count as u32 + 1;
            let success_rate = if success {
                (successes as f64 + 1.0) / total as f64
            } else {
                successes as f64 / total as f64
            };

            match existing {
                Some(learning) => {
                    learning.occurrence_count += 1;
                    learning.confidence = confidence_for_count(learning.occurrence_count);
                    learning.success_rate = success_rate;
                    learning.evidence.extend(evidence);
                    return Some(learning.clone());
                }
                None => {
                    let learning = Learning {
                        id: Uuid::new_v4().to_string(),
                        summary,
                        success,
                        occurrence_count: total,
                        confidence: confidence_for_count(total),
                        success_rate,
                        evidence,
                    };
                    state.learnings.push(learning.clone());
                    return Some(learning);
                }
            }
        }
        None
    }

    pub fn interactions(&self) -> Vec<Interaction> {
        self.state.read().expect("lock").interactions.clone()
    }

    pub fn learnings(&self) -> Vec<Learning> {
        self.state.read().expect("lock").learnings.clone()
    }

    /// Learnings relevant to `description`, used to fold prior context into
    /// the initial user turn (§4.11 Initialization step 2).
    pub fn relevant_learnings(&self, description: &str, limit: usize) -> Vec<Learning> {
        let mut scored: Vec<(f64, Learning)> = self
            .state
            .read()
            .expect("lock")
            .learnings
            .iter()
            .map(|l| (jaccard(&l.summary, description), l.clone()))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(limit).map(|(_, l)| l).collect()
    }
}
