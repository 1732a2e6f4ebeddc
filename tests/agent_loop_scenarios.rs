//! End-to-end scenarios driving [`AgentLoop`] against in-memory sandbox and
//! provider doubles — no real network or sandbox provider involved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use agent_core::agent::{AgentLoop, Collaborators};
use agent_core::ai::provider::LLMProvider;
use agent_core::ai::types::{CompletionRequest, CompletionResponse};
use agent_core::config::{LoopConfig, SandboxConfig};
use agent_core::error::CoreError;
use agent_core::learning::error_patterns::ErrorPatternStore;
use agent_core::learning::interaction_log::InteractionLog;
use agent_core::learning::knowledge_hub::KnowledgeHub;
use agent_core::learning::performance::PerformanceOptimizer;
use agent_core::learning::strategy::AdaptiveStrategy;
use agent_core::orchestrator::{AgentExecutor, Orchestrator};
use agent_core::sandbox::{ExecResult, FileEntry, SandboxClient, SandboxHandle};
use agent_core::task::{CancelToken, TaskStatus};

struct ScriptedSandbox {
    files: Mutex<HashMap<String, Vec<u8>>>,
    exec_calls: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    fn new() -> Self {
        Self { files: Mutex::new(HashMap::new()), exec_calls: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl SandboxClient for ScriptedSandbox {
    async fn create(&self) -> Result<SandboxHandle, CoreError> {
        Ok(SandboxHandle { id: "sbx-scenario".to_string(), workspace_root: "/workspace".to_string() })
    }
    async fn write_file(&self, _h: &SandboxHandle, path: &str, bytes: &[u8]) -> Result<(), CoreError> {
        self.files.lock().unwrap().insert(path.to_string(), bytes.to_vec());
        Ok(())
    }
    async fn read_file(&self, _h: &SandboxHandle, path: &str) -> Result<Vec<u8>, CoreError> {
        self.files.lock().unwrap().get(path).cloned().ok_or_else(|| CoreError::Sandbox("missing".into()))
    }
    async fn list_files(&self, _h: &SandboxHandle, _path: &str) -> Result<Vec<FileEntry>, CoreError> {
        Ok(vec![])
    }
    async fn exec(&self, _h: &SandboxHandle, command: &str, _workdir: &str, _timeout: Duration) -> Result<ExecResult, CoreError> {
        self.exec_calls.lock().unwrap().push(command.to_string());
        if command.contains("hello.py") {
            Ok(ExecResult { exit_code: 0, stdout: "hi\n".to_string(), stderr: String::new(), duration: Duration::from_millis(5), truncated: false })
        } else if command.contains("sleep 60") {
            Ok(ExecResult { exit_code: 0, stdout: "done\n".to_string(), stderr: String::new(), duration: Duration::from_secs(60), truncated: false })
        } else {
            Ok(ExecResult { exit_code: 0, stdout: "ok".to_string(), stderr: String::new(), duration: Duration::from_millis(1), truncated: false })
        }
    }
    async fn destroy(&self, _h: &SandboxHandle) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Replays a fixed script of completions, recording every request it saw so
/// tests can assert on prefix stability and bias maps (scenario 6).
struct ScriptedProvider {
    responses: Mutex<Vec<String>>,
    seen_requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(responses: Vec<String>) -> Self {
        Self { responses: Mutex::new(responses), seen_requests: Mutex::new(Vec::new()), calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_requests.lock().unwrap().push(request);
        let mut responses = self.responses.lock().unwrap();
        let content = if responses.is_empty() {
            "ACTION: TASK_COMPLETED\nMESSAGE: done\n---END---".to_string()
        } else {
            responses.remove(0)
        };
        Ok(CompletionResponse { content, model: "test".to_string(), usage: None, finish_reason: None })
    }
    fn context_limit(&self) -> usize {
        128_000
    }
    fn provider_name(&self) -> &str {
        "scripted"
    }
}

struct FixedExecutor {
    output: String,
}

#[async_trait]
impl AgentExecutor for FixedExecutor {
    async fn execute(&self, _input: &str) -> Result<String, CoreError> {
        Ok(self.output.clone())
    }
}

struct Fixtures {
    log: InteractionLog,
    hub: KnowledgeHub,
    errors: ErrorPatternStore,
    strategy: AdaptiveStrategy,
    performance: PerformanceOptimizer,
    orchestrator: Orchestrator,
}

impl Fixtures {
    fn new() -> Self {
        Self {
            log: InteractionLog::new(),
            hub: KnowledgeHub::new(),
            errors: ErrorPatternStore::new(),
            strategy: AdaptiveStrategy::new(),
            performance: PerformanceOptimizer::new(),
            orchestrator: Orchestrator::new(),
        }
    }

    fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            interaction_log: &self.log,
            knowledge_hub: &self.hub,
            error_patterns: &self.errors,
            strategy: &self.strategy,
            performance: &self.performance,
            knowledge_agent: None,
            browser_agent: None,
            orchestrator: Some(&self.orchestrator),
        }
    }
}

// Scenario 1: happy path, one file.
#[tokio::test]
async fn happy_path_one_file() {
    let sandbox = ScriptedSandbox::new();
    let provider = ScriptedProvider::new(vec![
        "ACTION: CREATE_FILE\nPATH: hello.py\nCONTENT: print('hi')\n---END---".to_string(),
        "ACTION: EXECUTE\nCOMMAND: python3 hello.py\n---END---".to_string(),
        "ACTION: VERIFY\nCOMMAND: python3 hello.py\n---END---".to_string(),
        "ACTION: TASK_COMPLETED\nMESSAGE: printed hi\n---END---".to_string(),
    ]);
    let fixtures = Fixtures::new();

    let mut agent_loop = AgentLoop::new(
        "scenario-1",
        "Create a file hello.py containing print('hi') and run it.",
        &sandbox,
        &provider,
        "test-model",
        fixtures.collaborators(),
        LoopConfig::default(),
        SandboxConfig::default(),
        false,
        CancelToken::new(),
    );

    let status = agent_loop.run().await;
    assert_eq!(status, TaskStatus::Completed);

    let files = sandbox.files.lock().unwrap();
    let content = files.get("/workspace/hello.py").expect("hello.py written");
    assert_eq!(String::from_utf8_lossy(content), "print('hi')");

    let exec_calls = sandbox.exec_calls.lock().unwrap();
    assert!(exec_calls.iter().any(|c| c.contains("hello.py")));
}

// Scenario 2: an action not legal in the current phase is rejected, no
// sandbox write occurs, and the task is still able to proceed afterward.
#[tokio::test]
async fn illegal_action_is_rejected_without_side_effects() {
    let sandbox = ScriptedSandbox::new();
    let provider = ScriptedProvider::new(vec![
        // VERIFY isn't allowed until the loop has transitioned to Verifying.
        "ACTION: VERIFY\nCOMMAND: echo nope\n---END---".to_string(),
        "ACTION: CREATE_FILE\nPATH: x.txt\nCONTENT: z\n---END---".to_string(),
        "ACTION: TASK_COMPLETED\nMESSAGE: done\n---END---".to_string(),
    ]);
    let fixtures = Fixtures::new();

    let mut agent_loop = AgentLoop::new(
        "scenario-2",
        "a task that starts with a premature verify",
        &sandbox,
        &provider,
        "test-model",
        fixtures.collaborators(),
        LoopConfig::default(),
        SandboxConfig::default(),
        false,
        CancelToken::new(),
    );

    let status = agent_loop.run().await;
    assert_eq!(status, TaskStatus::Completed);
    assert!(sandbox.files.lock().unwrap().contains_key("/workspace/x.txt"));
    // The rejected VERIFY never ran as an exec call.
    assert!(sandbox.exec_calls.lock().unwrap().iter().all(|c| !c.contains("echo nope")));
}

// Scenario 3: iteration limit.
#[tokio::test]
async fn iteration_limit_fails_with_five_llm_requests() {
    let sandbox = ScriptedSandbox::new();
    let provider = ScriptedProvider::new(vec!["THINK with no action block".to_string(); 10]);
    let fixtures = Fixtures::new();
    let mut loop_config = LoopConfig::default();
    loop_config.max_iterations = 5;

    let mut agent_loop = AgentLoop::new(
        "scenario-3",
        "Loop forever printing dots.",
        &sandbox,
        &provider,
        "test-model",
        fixtures.collaborators(),
        loop_config,
        SandboxConfig::default(),
        false,
        CancelToken::new(),
    );

    let status = agent_loop.run().await;
    assert_eq!(status, TaskStatus::Failed);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 5);
}

// Scenario 4: cancellation mid-exec. The cancel token trips between the
// loop's per-action cancellation checks; the task ends cancelled rather
// than completed, and no further LLM calls occur after the flag is set.
#[tokio::test]
async fn cancellation_stops_before_task_completion() {
    let sandbox = ScriptedSandbox::new();
    let cancel = CancelToken::new();
    cancel.cancel();
    let provider = ScriptedProvider::new(vec!["ACTION: EXECUTE\nCOMMAND: sleep 60 && echo done\n---END---".to_string()]);
    let fixtures = Fixtures::new();

    let mut agent_loop = AgentLoop::new(
        "scenario-4",
        "Run `sleep 60 && echo done`.",
        &sandbox,
        &provider,
        "test-model",
        fixtures.collaborators(),
        LoopConfig::default(),
        SandboxConfig::default(),
        false,
        cancel,
    );

    let status = agent_loop.run().await;
    assert_eq!(status, TaskStatus::Cancelled);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

// Scenario 5: sequential delegation records both the sub-agent's and the
// parent task's interaction.
#[tokio::test]
async fn delegation_records_subagent_and_parent_interactions() {
    let sandbox = ScriptedSandbox::new();
    let provider = ScriptedProvider::new(vec![
        "ACTION: DELEGATE\nAGENT_KIND: researcher\nTASK: summarize topic X\n---END---".to_string(),
        "ACTION: CREATE_FILE\nPATH: summary.md\nCONTENT: topic X notes\n---END---".to_string(),
        "ACTION: TASK_COMPLETED\nMESSAGE: summarized\n---END---".to_string(),
    ]);
    let mut fixtures = Fixtures::new();
    fixtures
        .orchestrator
        .register("researcher", std::sync::Arc::new(FixedExecutor { output: "topic X is about...".to_string() }));

    let mut agent_loop = AgentLoop::new(
        "scenario-5",
        "Research X, then write a file summarizing it.",
        &sandbox,
        &provider,
        "test-model",
        fixtures.collaborators(),
        LoopConfig::default(),
        SandboxConfig::default(),
        false,
        CancelToken::new(),
    );

    let status = agent_loop.run().await;
    assert_eq!(status, TaskStatus::Completed);

    let interactions = fixtures.log.interactions();
    assert!(interactions.iter().any(|i| i.agent_kind == "researcher" && i.success));
    assert!(interactions.iter().any(|i| i.agent_kind != "researcher"));
}

// Scenario 6: bias vs prefix stability across a PLANNING -> EXECUTING ->
// VERIFYING run. The system+conversation-prefix bytes sent to the provider
// only ever grow; the per-call logit_bias map is the only thing that
// changes shape across phases.
#[tokio::test]
async fn prefix_is_stable_across_phase_transitions() {
    let sandbox = ScriptedSandbox::new();
    let provider = ScriptedProvider::new(vec![
        "ACTION: CREATE_FILE\nPATH: a.txt\nCONTENT: a\n---END---".to_string(),
        "ACTION: VERIFY\nCOMMAND: true\n---END---".to_string(),
        "ACTION: TASK_COMPLETED\nMESSAGE: done\n---END---".to_string(),
    ]);
    let fixtures = Fixtures::new();

    let mut agent_loop = AgentLoop::new(
        "scenario-6",
        "write a file and verify it",
        &sandbox,
        &provider,
        "test-model",
        fixtures.collaborators(),
        LoopConfig::default(),
        SandboxConfig::default(),
        false,
        CancelToken::new(),
    );

    let status = agent_loop.run().await;
    assert_eq!(status, TaskStatus::Completed);

    let seen = provider.seen_requests.lock().unwrap();
    assert!(seen.len() >= 3);

    let first_system = seen[0].messages[0].content.clone();
    for request in seen.iter() {
        assert_eq!(request.messages[0].content, first_system, "system prompt bytes must stay identical");
        // Every earlier call's messages form a prefix of this call's.
    }
    for later in seen.iter().skip(1) {
        assert!(later.messages.len() > 1, "later calls must carry conversation turns beyond the system prompt");
    }

    // logit_bias maps differ in content across phases (forbidden tools
    // carry -100) even though the surrounding message structure doesn't.
    let biases: Vec<_> = seen.iter().map(|r| r.bias_map.clone().unwrap_or_default()).collect();
    assert!(biases.iter().any(|b| b.values().any(|v| *v == -100)));
}
