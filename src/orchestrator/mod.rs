//! Orchestrator (C8): dispatches delegated subtasks across four execution
//! shapes. Each delegated task is recorded as an interaction (C9) with the
//! sub-agent tag by the caller, which owns the [`crate::learning::InteractionLog`]
//! instance (§4.8).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::CoreError;

/// Default bound on concurrently-running sub-agent tasks (§4.8 Parallel).
pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub agent_kind: String,
    pub input: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskResult {
    pub agent_kind: String,
    pub success: bool,
    pub output: String,
}

/// One agent-kind's executor. Implementations run the actual sub-agent
/// (a nested loop, a knowledge-agent call, a browser-agent call, ...).
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, input: &str) -> Result<String, CoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Concat,
    Merge,
    Vote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub winning_output: String,
    pub agreement: f64,
    pub reached_consensus: bool,
}

/// Maps an agent-kind tag to its executor (§4.8's "agent registry").
pub struct Orchestrator {
    registry: HashMap<String, Arc<dyn AgentExecutor>>,
    concurrency: usize,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self { registry: HashMap::new(), concurrency: DEFAULT_CONCURRENCY }
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn register(&mut self, agent_kind: impl Into<String>, executor: Arc<dyn AgentExecutor>) {
        self.registry.insert(agent_kind.into(), executor);
    }

    fn executor_for(&self, agent_kind: &str) -> Result<Arc<dyn AgentExecutor>, CoreError> {
        self.registry
            .get(agent_kind)
            .cloned()
            .ok_or_else(|| CoreError::Configuration(format!("no executor registered for agent kind '{agent_kind}'")))
    }

    async fn run_one(&self, task: SubTask) -> SubTaskResult {
        match self.executor_for(&task.agent_kind) {
            Ok(executor) => match executor.execute(&task.input).await {
                Ok(output) => SubTaskResult { agent_kind: task.agent_kind, success: true, output },
                Err(e) => SubTaskResult { agent_kind: task.agent_kind, success: false, output: e.human_message() },
            },
            Err(e) => SubTaskResult { agent_kind: task.agent_kind, success: false, output: e.human_message() },
        }
    }

    /// Runs `tasks` in listed order. With `strict`, halts and returns early
    /// on the first failure; otherwise runs every task and returns the full
    /// list with failures marked (§4.8 Sequential).
    pub async fn run_sequential(&self, tasks: Vec<SubTask>, strict: bool) -> Vec<SubTaskResult> {
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            let result = self.run_one(task).await;
            let failed = !result.success;
            results.push(result);
            if strict && failed {
                break;
            }
        }
        results
    }

    /// Starts every task concurrently, bounded by `self.concurrency`, and
    /// returns the results in submission order (§4.8 Parallel).
    pub async fn run_parallel(&self, tasks: Vec<SubTask>) -> Vec<SubTaskResult> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for (index, task) in tasks.into_iter().enumerate() {
            let executor = self.executor_for(&task.agent_kind).ok();
            let permit = semaphore.clone();
            join_set.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore not closed");
                let result = match executor {
                    Some(executor) => match executor.execute(&task.input).await {
                        Ok(output) => SubTaskResult { agent_kind: task.agent_kind, success: true, output },
                        Err(e) => SubTaskResult { agent_kind: task.agent_kind, success: false, output: e.human_message() },
                    },
                    None => SubTaskResult {
                        agent_kind: task.agent_kind.clone(),
                        success: false,
                        output: format!("no executor registered for agent kind '{}'", task.agent_kind),
                    },
                };
                (index, result)
            });
        }

        let mut indexed = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            if let Ok(pair) = joined {
                indexed.push(pair);
            }
        }
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }

    /// Runs `subtasks` (already composed sequentially/parallel-ly by the
    /// caller) then aggregates per `aggregation` (§4.8 Hierarchical).
    pub fn aggregate(&self, results: &[SubTaskResult], aggregation: Aggregation) -> String {
        match aggregation {
            Aggregation::Concat => results.iter().map(|r| r.output.clone()).collect::<Vec<_>>().join("\n"),
            Aggregation::Merge => merge_dedup_lines(results),
            Aggregation::Vote => modal_output(results).unwrap_or_default(),
        }
    }

    /// Dispatches identical `input` to `replicas` agents of `agent_kind`,
    /// groups by normalized-text equality, and declares consensus if the
    /// largest group's share is ≥ `min_agreement` (§4.8 Consensus).
    pub async fn run_consensus(&self, agent_kind: &str, input: &str, replicas: usize, min_agreement: f64) -> ConsensusOutcome {
        let tasks: Vec<SubTask> = (0..replicas)
            .map(|_| SubTask { agent_kind: agent_kind.to_string(), input: input.to_string() })
            .collect();
        let results = self.run_parallel(tasks).await;

        let mut groups: Vec<(String, usize)> = Vec::new();
        for result in &results {
            if !result.success {
                continue;
            }
            let normalized = normalize(&result.output);
            if let Some(entry) = groups.iter_mut().find(|(text, _)| *text == normalized) {
                entry.1 += 1;
            } else {
                groups.push((normalized, 1));
            }
        }

        let total = results.iter().filter(|r| r.success).count().max(1);
        groups.sort_by(|a, b| b.1.cmp(&a.1));

        match groups.first() {
            Some((text, count)) => {
                let agreement = *count as f64 / total as f64;
                let winning = results
                    .iter()
                    .find(|r| r.success && normalize(&r.output) == *text)
                    .map(|r| r.output.clone())
                    .unwrap_or_default();
                ConsensusOutcome { winning_output: winning, agreement, reached_consensus: agreement >= min_agreement }
            }
            None => ConsensusOutcome { winning_output: String::new(), agreement: 0.0, reached_consensus: false },
        }
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn merge_dedup_lines(results: &[SubTaskResult]) -> String {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for result in results {
        for line in result.output.lines() {
            if seen.insert(line.to_string()) {
                out.push(line.to_string());
            }
        }
    }
    out.join("\n")
}

fn modal_output(results: &[SubTaskResult]) -> Option<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for result in results {
        let normalized = normalize(&result.output);
        if let Some(entry) = counts.iter_mut().find(|(text, _)| *text == normalized) {
            entry.1 += 1;
        } else {
            counts.push((normalized, 1));
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().next().and_then(|(text, _)| results.iter().find(|r| normalize(&r.output) == text).map(|r| r.output.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoExecutor;

    #[async_trait]
    impl AgentExecutor for EchoExecutor {
        async fn execute(&self, input: &str) -> Result<String, CoreError> {
            Ok(input.to_string())
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl AgentExecutor for FailingExecutor {
        async fn execute(&self, _input: &str) -> Result<String, CoreError> {
            Err(CoreError::Semantic("boom".to_string()))
        }
    }

    fn task(kind: &str, input: &str) -> SubTask {
        SubTask { agent_kind: kind.to_string(), input: input.to_string() }
    }

    #[tokio::test]
    async fn sequential_strict_halts_on_first_failure() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.register("echo", Arc::new(EchoExecutor));
        orchestrator.register("fail", Arc::new(FailingExecutor));

        let tasks = vec![task("echo", "a"), task("fail", "b"), task("echo", "c")];
        let results = orchestrator.run_sequential(tasks, true).await;
        assert_eq!(results.len(), 2);
        assert!(!results[1].success);
    }

    #[tokio::test]
    async fn sequential_non_strict_runs_all_tasks() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.register("echo", Arc::new(EchoExecutor));
        orchestrator.register("fail", Arc::new(FailingExecutor));

        let tasks = vec![task("echo", "a"), task("fail", "b"), task("echo", "c")];
        let results = orchestrator.run_sequential(tasks, false).await;
        assert_eq!(results.len(), 3);
        assert!(results[2].success);
    }

    #[tokio::test]
    async fn parallel_preserves_submission_order() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.register("echo", Arc::new(EchoExecutor));
        let tasks = vec![task("echo", "1"), task("echo", "2"), task("echo", "3")];
        let results = orchestrator.run_parallel(tasks).await;
        assert_eq!(results.iter().map(|r| r.output.clone()).collect::<Vec<_>>(), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn consensus_declares_agreement_above_threshold() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.register("echo", Arc::new(EchoExecutor));
        let outcome = orchestrator.run_consensus("echo", "same answer", 4, 0.6).await;
        assert!(outcome.reached_consensus);
        assert_eq!(outcome.agreement, 1.0);
    }

    #[test]
    fn merge_aggregation_deduplicates_lines() {
        let orchestrator = Orchestrator::new();
        let results = vec![
            SubTaskResult { agent_kind: "a".into(), success: true, output: "one\ntwo".into() },
            SubTaskResult { agent_kind: "b".into(), success: true, output: "two\nthree".into() },
        ];
        let merged = orchestrator.aggregate(&results, Aggregation::Merge);
        assert_eq!(merged, "one\ntwo\nthree");
    }

    #[test]
    fn vote_aggregation_picks_modal_result() {
        let orchestrator = Orchestrator::new();
        let results = vec![
            SubTaskResult { agent_kind: "a".into(), success: true, output: "X".into() },
            SubTaskResult { agent_kind: "b".into(), success: true, output: "X".into() },
            SubTaskResult { agent_kind: "c".into(), success: true, output: "Y".into() },
        ];
        let vote = orchestrator.aggregate(&results, Aggregation::Vote);
        assert_eq!(vote, "X");
    }
}
