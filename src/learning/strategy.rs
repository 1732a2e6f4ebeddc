//! Adaptive Strategy (§4.9.4): classifies a task description by keyword
//! heuristic and replays the nearest prior characterization's best-known
//! strategy, or falls back to defaults.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::jaccard;

/// Jaccard threshold for "nearest prior characterization" (§4.9.4).
const NEAREST_THRESHOLD: f64 = 0.5;

const BUILD_VERBS: &[&str] = &["build", "create", "implement", "add", "write"];
const TEST_VERBS: &[&str] = &["test", "verify", "check"];
const DEBUG_VERBS: &[&str] = &["debug", "fix", "diagnose", "troubleshoot"];
const MULTI_AGENT_KEYWORDS: &[&str] = &["research", "then", "and then", "summarize", "delegate"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionShape {
    Single,
    Sequential,
    Parallel,
    Hierarchical,
    Consensus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyAnalysis {
    pub complexity: Complexity,
    pub suggested_agents: Vec<String>,
    pub estimated_duration_s: u64,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Outcome {
    description: String,
    keywords: Vec<String>,
    shape: ExecutionShape,
    success: bool,
    duration_s: u64,
}

pub struct AdaptiveStrategy {
    outcomes: RwLock<Vec<Outcome>>,
}

impl Default for AdaptiveStrategy {
    fn default() -> Self {
        Self { outcomes: RwLock::new(Vec::new()) }
    }
}

impl AdaptiveStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyword-heuristic classification (§4.9.4): counts verb hits, file
    /// mentions, and description length to bucket complexity.
    pub fn analyze(&self, description: &str) -> StrategyAnalysis {
        let lower = description.to_lowercase();
        let words: Vec<&str> = lower.split_whitespace().collect();

        let verb_hits = BUILD_VERBS.iter().chain(TEST_VERBS).chain(DEBUG_VERBS)
            .filter(|v| lower.contains(*v))
            .count();
        let file_mentions = lower.matches(".py").count()
            + lower.matches(".rs").count()
            + lower.matches(".js").count()
            + lower.matches("file").count();
        let length_score = words.len();

        let mut score = verb_hits * 2 + file_mentions + length_score / 10;
        if MULTI_AGENT_KEYWORDS.iter().any(|k| lower.contains(k)) {
            score += 3;
        }

        let complexity = match score {
            0..=1 => Complexity::Trivial,
            2..=4 => Complexity::Simple,
            5..=8 => Complexity::Moderate,
            9..=14 => Complexity::Complex,
            _ => Complexity::VeryComplex,
        };

        let mut suggested_agents = vec!["coder".to_string()];
        if lower.contains("research") || lower.contains("search") || lower.contains("find out") {
            suggested_agents.push("knowledge".to_string());
        }
        if lower.contains("browse") || lower.contains("website") || lower.contains("click") {
            suggested_agents.push("browser".to_string());
        }

        let keywords: Vec<String> = BUILD_VERBS.iter().chain(TEST_VERBS).chain(DEBUG_VERBS)
            .chain(MULTI_AGENT_KEYWORDS)
            .filter(|k| lower.contains(*k))
            .map(|s| s.to_string())
            .collect();

        let estimated_duration_s = 30 + (score as u64) * 20;

        StrategyAnalysis { complexity, suggested_agents, estimated_duration_s, keywords }
    }

    /// Looks up the nearest prior characterization (Jaccard on keyword sets
    /// ≥ 0.5) and replays its best-known outcome's shape; otherwise applies
    /// the documented defaults (§4.9.4).
    pub fn select_strategy(&self, description: &str, analysis: &StrategyAnalysis) -> ExecutionShape {
        let keyword_text = analysis.keywords.join(" ");
        let outcomes = self.outcomes.read().expect("lock");

        let mut best: Option<(f64, &Outcome)> = None;
        for outcome in outcomes.iter() {
            let score = jaccard(&outcome.keywords.join(" "), &keyword_text).max(jaccard(&outcome.description, description));
            if score >= NEAREST_THRESHOLD && best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, outcome));
            }
        }

        if let Some((_, outcome)) = best {
            return outcome.shape;
        }

        if analysis.complexity >= Complexity::Complex {
            ExecutionShape::Hierarchical
        } else if MULTI_AGENT_KEYWORDS.iter().any(|k| description.to_lowercase().contains(k)) {
            ExecutionShape::Sequential
        } else {
            ExecutionShape::Single
        }
    }

    /// Records the outcome of a chosen strategy so future similar tasks can
    /// replay it.
    pub fn record_outcome(&self, description: &str, keywords: Vec<String>, shape: ExecutionShape, success: bool, duration_s: u64) {
        self.outcomes.write().expect("lock").push(Outcome {
            description: description.to_string(),
            keywords,
            shape,
            success,
            duration_s,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_task_has_low_complexity() {
        let strategy = AdaptiveStrategy::new();
        let analysis = strategy.analyze("say hi");
        assert_eq!(analysis.complexity, Complexity::Trivial);
    }

    #[test]
    fn multi_step_task_suggests_sequential_by_default() {
        let strategy = AdaptiveStrategy::new();
        let analysis = strategy.analyze("Research X, then write a file summarizing it.");
        let shape = strategy.select_strategy("Research X, then write a file summarizing it.", &analysis);
        assert_eq!(shape, ExecutionShape::Sequential);
    }

    #[test]
    fn replays_first_outcome_among_identical_characterizations() {
        let strategy = AdaptiveStrategy::new();
        let description = "build a rest api with tests";
        let analysis = strategy.analyze(description);
        strategy.record_outcome(description, analysis.keywords.clone(), ExecutionShape::Hierarchical, true, 20);
        strategy.record_outcome(description, analysis.keywords.clone(), ExecutionShape::Single, false, 200);

        let shape = strategy.select_strategy(description, &analysis);
        assert_eq!(shape, ExecutionShape::Hierarchical);
    }

    #[test]
    fn replays_nearest_prior_outcome() {
        let strategy = AdaptiveStrategy::new();
        let description = "build a rest api with tests";
        let analysis = strategy.analyze(description);
        strategy.record_outcome(description, analysis.keywords.clone(), ExecutionShape::Hierarchical, true, 50);

        let analysis2 = strategy.analyze("build a rest api with tests and docs");
        let shape = strategy.select_strategy("build a rest api with tests and docs", &analysis2);
        assert_eq!(shape, ExecutionShape::Hierarchical);
    }
}
