//! Error Pattern Store (§4.9.5): clusters similar errors via Jaccard
//! similarity over message word-sets; once a cluster accretes ≥3 members it
//! becomes a named pattern with cached root-cause/fix suggestions.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::jaccard;
use crate::error::ReasonKind;

/// Minimum Jaccard similarity to join an existing candidate (§4.9.5).
const SIMILARITY_THRESHOLD: f64 = 0.7;
/// Member count at which a candidate becomes a named pattern.
const NAMED_PATTERN_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedError {
    pub kind: String,
    pub message: String,
}

/// A `record()` call's categorization, per §7's error taxonomy.
pub fn categorize(reason: ReasonKind) -> &'static str {
    reason.as_str()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub id: String,
    pub kind: String,
    pub representative_message: String,
    pub members: Vec<String>,
    pub is_named: bool,
    pub root_cause: Option<String>,
    pub fix_suggestions: Vec<String>,
}

/// Generates root-cause + 3-5 fix suggestions for a newly-named pattern.
/// Grounded as a pluggable hook so the caller can route through an
/// [`crate::ai::LLMProvider`]; falls back to a generic suggestion set when
/// no generator is supplied, matching §4.9.5's "subsequent similar errors
/// reuse cached suggestions" requirement even without a live LLM call.
pub trait SuggestionGenerator: Send + Sync {
    fn generate(&self, kind: &str, representative_message: &str) -> (String, Vec<String>);
}

pub struct GenericSuggestionGenerator;

impl SuggestionGenerator for GenericSuggestionGenerator {
    fn generate(&self, kind: &str, representative_message: &str) -> (String, Vec<String>) {
        (
            format!("recurring {kind} error: {representative_message}"),
            vec![
                "retry the failing action with backoff".to_string(),
                "inspect the last action's parameters for malformed input".to_string(),
                "check whether the sandbox or provider is degraded".to_string(),
            ],
        )
    }
}

pub struct ErrorPatternStore {
    patterns: RwLock<Vec<ErrorPattern>>,
    generator: Box<dyn SuggestionGenerator>,
}

impl Default for ErrorPatternStore {
    fn default() -> Self {
        Self { patterns: RwLock::new(Vec::new()), generator: Box::new(GenericSuggestionGenerator) }
    }
}

impl ErrorPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generator(generator: Box<dyn SuggestionGenerator>) -> Self {
        Self { patterns: RwLock::new(Vec::new()), generator }
    }

    /// Finds the best-matching existing pattern (Jaccard ≥ 0.7) or creates a
    /// new candidate; promotes to a named pattern at ≥3 members (§4.9.5).
    pub fn record(&self, error: RecordedError) -> ErrorPattern {
        let mut patterns = self.patterns.write().expect("lock");

        let best = patterns
            .iter_mut()
            .filter(|p| p.kind == error.kind)
            .map(|p| (jaccard(&p.representative_message, &error.message), p))
            .filter(|(score, _)| *score >= SIMILARITY_THRESHOLD)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((_, pattern)) = best {
            pattern.members.push(error.message.clone());
            if !pattern.is_named && pattern.members.len() >= NAMED_PATTERN_THRESHOLD {
                pattern.is_named = true;
                let (root_cause, suggestions) = self.generator.generate(&pattern.kind, &pattern.representative_message);
                pattern.root_cause = Some(root_cause);
                pattern.fix_suggestions = suggestions;
            }
            return pattern.clone();
        }

        let pattern = ErrorPattern {
            id: Uuid::new_v4().to_string(),
            kind: error.kind,
            representative_message: error.message.clone(),
            members: vec![error.message],
            is_named: false,
            root_cause: None,
            fix_suggestions: Vec::new(),
        };
        patterns.push(pattern.clone());
        pattern
    }

    pub fn patterns(&self) -> Vec<ErrorPattern> {
        self.patterns.read().expect("lock").clone()
    }
}
