//! Agent Loop (C11) — the core scheduler.
//!
//! Drives one task from `IDLE` through `PLANNING`, repeated `EXECUTING` /
//! `VERIFYING` iterations, and into `LEARNING` for finalization. Tool
//! availability per iteration is gated purely by `C3::bias_for` — the
//! rendered system prompt never changes (§4.11, §8 prefix stability).

use std::time::Instant;

use crate::action::Action;
use crate::agent::parser::parse_response;
use crate::agent::planner;
use crate::ai::provider::LLMProvider;
use crate::ai::types::{CompletionRequest, Message};
use crate::browser::{BrowserActionKind, BrowserDispatch, StructuredAction};
use crate::config::{LoopConfig, SandboxConfig};
use crate::error::{CoreError, ReasonKind};
use crate::events::{EventKind, EventStream};
use crate::knowledge::{Depth, KnowledgeAgent};
use crate::learning::error_patterns::{categorize, ErrorPatternStore, RecordedError};
use crate::learning::interaction_log::{extract_tags, Interaction, InteractionLog};
use crate::learning::knowledge_hub::{KnowledgeHub, Priority};
use crate::learning::performance::PerformanceOptimizer;
use crate::learning::strategy::AdaptiveStrategy;
use crate::orchestrator::{Orchestrator, SubTask};
use crate::phase::Phase;
use crate::sandbox::{truncate_utf8, SandboxClient, SandboxHandle, EXEC_OUTPUT_CAP_BYTES};
use crate::task::{CancelToken, Task, TaskStatus};

const CORE_SYSTEM_PROMPT: &str = "You are an autonomous software-engineering agent working inside a \
sandboxed workspace. You act exclusively by emitting one or more ACTION blocks using the grammar:\n\n\
ACTION: <TOOL_ID>\nKEY: value\n---END---\n\n\
Only tools valid in your current phase are usable; emitting any other tool is rejected. When the task \
is fully done, emit a TASK_COMPLETED action with a MESSAGE summarizing the result.";

const READ_FILE_EVENT_CAP_BYTES: usize = 16 * 1024;
const RAW_ACTION_RESULTS_KEPT: usize = 10;

/// The result of running one dispatched action.
struct DispatchOutcome {
    tool: String,
    success: bool,
    output: String,
}

/// Everything the loop needs beyond the sandbox/provider pair, all
/// process-wide and shared across concurrently-running tasks (§5).
pub struct Collaborators<'a> {
    pub interaction_log: &'a InteractionLog,
    pub knowledge_hub: &'a KnowledgeHub,
    pub error_patterns: &'a ErrorPatternStore,
    pub strategy: &'a AdaptiveStrategy,
    pub performance: &'a PerformanceOptimizer,
    pub knowledge_agent: Option<&'a KnowledgeAgent<'a>>,
    pub browser_agent: Option<&'a dyn BrowserDispatch>,
    pub orchestrator: Option<&'a Orchestrator>,
}

/// Drives exactly one task. Owns the task's conversation, todo document, and
/// sandbox handle exclusively — no other task touches them (§5).
pub struct AgentLoop<'a> {
    sandbox: &'a dyn SandboxClient,
    provider: &'a dyn LLMProvider,
    events: EventStream,
    collaborators: Collaborators<'a>,
    loop_config: LoopConfig,
    sandbox_config: SandboxConfig,
    planner_enabled: bool,
    model: String,

    task: Task,
    cancel: CancelToken,
    phase: Phase,
    conversation: Vec<Message>,
    accumulated_learnings: String,
    todo: String,
    handle: Option<SandboxHandle>,
    pending_task_completed: Option<String>,
    started_at: Option<Instant>,
    /// Ordered tools dispatched over the task's lifetime, for the
    /// Interaction Record's action list (§3).
    action_log: Vec<String>,
    /// Each dispatched action's result, aligned by index with `action_log`.
    result_log: Vec<String>,
    /// Strategy chosen at initialization, replayed at finalization for
    /// outcome recording (§4.9.4).
    chosen_shape: crate::learning::strategy::ExecutionShape,
    /// Complexity bucket computed at initialization, used as the
    /// Performance Optimizer's task-category key (§4.9.3).
    task_category: String,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        task_id: impl Into<String>,
        description: impl Into<String>,
        sandbox: &'a dyn SandboxClient,
        provider: &'a dyn LLMProvider,
        model: impl Into<String>,
        collaborators: Collaborators<'a>,
        loop_config: LoopConfig,
        sandbox_config: SandboxConfig,
        planner_enabled: bool,
        cancel: CancelToken,
    ) -> Self {
        let task_id = task_id.into();
        let events = EventStream::new(task_id.clone());
        Self {
            sandbox,
            provider,
            events,
            collaborators,
            loop_config,
            sandbox_config,
            planner_enabled,
            model: model.into(),
            task: Task::new(task_id, description),
            cancel,
            phase: Phase::Idle,
            conversation: Vec::new(),
            accumulated_learnings: String::new(),
            todo: String::new(),
            handle: None,
            pending_task_completed: None,
            started_at: None,
            action_log: Vec::new(),
            result_log: Vec::new(),
            chosen_shape: crate::learning::strategy::ExecutionShape::Single,
            task_category: "unclassified".to_string(),
        }
    }

    pub fn events(&self) -> EventStream {
        self.events.clone()
    }

    fn set_phase(&mut self, to: Phase) {
        if self.phase != to {
            self.events.append(EventKind::PhaseChanged { from: self.phase.as_str().to_string(), to: to.as_str().to_string() });
            self.phase = to;
        }
    }

    fn temperature_for(&self, phase: Phase) -> f32 {
        self.loop_config
            .phase_temperature_overrides
            .get(phase.as_str())
            .copied()
            .unwrap_or(self.loop_config.default_temperature)
    }

    /// Runs the task to completion, returning its final status.
    pub async fn run(&mut self) -> TaskStatus {
        if let Err(e) = self.initialize().await {
            return self.fail(e).await;
        }

        let outcome = self.iterate().await;

        match outcome {
            Ok(message) => self.finalize_success(message).await,
            Err(e) => self.fail(e).await,
        }
    }

    // ─── Initialization ──────────────────────────────────────────────────

    async fn initialize(&mut self) -> Result<(), CoreError> {
        self.started_at = Some(Instant::now());
        self.task.touch(TaskStatus::Planning);
        self.set_phase(Phase::Planning);

        // Advisory only; the chosen shape isn't enforced on tool dispatch,
        // only replayed at finalization for outcome recording (§4.9.4).
        let analysis = self.collaborators.strategy.analyze(&self.task.description);
        self.chosen_shape = self.collaborators.strategy.select_strategy(&self.task.description, &analysis);
        self.task_category = format!("{:?}", analysis.complexity).to_lowercase();

        let learnings = self.collaborators.interaction_log.relevant_learnings(&self.task.description, 5);
        let knowledge = self.collaborators.knowledge_hub.query(&self.task.description, 5);

        let mut context_block = String::new();
        if !learnings.is_empty() {
            context_block.push_str("Relevant prior learnings:\n");
            for l in &learnings {
                context_block.push_str(&format!("- {}\n", l.summary));
            }
        }
        if !knowledge.is_empty() {
            context_block.push_str("Relevant shared knowledge:\n");
            for k in &knowledge {
                context_block.push_str(&format!("- {}: {}\n", k.title, k.content));
            }
        }

        let (plan, todo) = if self.planner_enabled {
            planner::plan(self.provider, &self.model, &self.task.description, Some(&self.task.id)).await
        } else {
            let p = planner::Plan::empty_with_seed(&self.task.description);
            let rendered = planner::render_todo(&p);
            (p, rendered)
        };
        self.todo = todo;

        let handle = self.sandbox.create().await?;
        self.sandbox
            .write_file(&handle, "todo.md", self.todo.as_bytes())
            .await?;
        self.handle = Some(handle);

        self.events.append(EventKind::PlanCreated { goal: plan.goal.clone(), step_count: plan.ordered_steps.len() });

        let mut initial_turn = format!("Task: {}\n\n", self.task.description);
        if !context_block.is_empty() {
            initial_turn.push_str(&context_block);
            initial_turn.push('\n');
        }
        initial_turn.push_str(&format!("Plan:\n{}\n\nCurrent todo.md:\n{}\n", plan.goal, self.todo));
        self.conversation.push(Message::user(initial_turn));

        self.task.touch(TaskStatus::Executing);
        self.set_phase(Phase::Executing);
        Ok(())
    }

    // ─── Iteration ───────────────────────────────────────────────────────

    async fn iterate(&mut self) -> Result<String, CoreError> {
        let mut last_results: Vec<DispatchOutcome> = Vec::new();
        let mut last_rejections: Vec<(String, String)> = Vec::new();
        let mut no_valid_action_last_time = false;

        for iteration in 0..self.loop_config.max_iterations {
            if self.cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            self.task.iterations_used = iteration + 1;
            self.events.append(EventKind::IterationStarted { iteration });

            self.append_iteration_user_turn(&last_results, &last_rejections, no_valid_action_last_time);
            last_results.clear();
            last_rejections.clear();

            let response = match self.call_llm().await {
                Ok(content) => content,
                Err(CoreError::ContextOverflow) => {
                    self.compress_history();
                    match self.call_llm().await {
                        Ok(content) => content,
                        Err(_) => return Err(CoreError::ContextOverflow),
                    }
                }
                Err(e @ CoreError::LlmFatal(_)) => return Err(e),
                Err(e) => {
                    self.events.append(EventKind::ErrorRecorded { kind: categorize(e.reason_kind()).to_string(), message: e.human_message() });
                    self.collaborators.error_patterns.record(RecordedError {
                        kind: categorize(e.reason_kind()).to_string(),
                        message: e.human_message(),
                    });
                    self.task.errors_count += 1;
                    no_valid_action_last_time = true;
                    continue;
                }
            };

            self.conversation.push(Message::assistant(response.clone()));
            let outcome = parse_response(&response);

            for err in &outcome.parse_errors {
                self.events.append(EventKind::ActionRejected { tool: String::new(), reason: err.clone() });
            }

            let mut valid_actions: Vec<Action> = Vec::new();
            for action in &outcome.actions {
                let validation = crate::tools::validate(action, self.phase);
                if validation.is_ok() {
                    self.events.append(EventKind::ActionParsed { tool: action.tool.clone(), seq_index: action.seq_index });
                    valid_actions.push(action.clone());
                } else {
                    self.events.append(EventKind::ActionRejected { tool: action.tool.clone(), reason: validation.reason().to_string() });
                    last_rejections.push((action.tool.clone(), validation.reason().to_string()));
                }
            }

            no_valid_action_last_time = valid_actions.is_empty();

            let task_completed_index = valid_actions.iter().position(|a| a.tool == "TASK_COMPLETED");

            for action in valid_actions.iter() {
                if action.tool == "TASK_COMPLETED" && task_completed_index != Some(valid_actions.len() - 1) {
                    // Suppressed: not the last action this iteration (§4.11 tie-break).
                    continue;
                }
                let dispatched = self.dispatch(action).await;
                if !dispatched.success {
                    self.task.errors_count += 1;
                    self.collaborators.error_patterns.record(RecordedError {
                        kind: categorize(ReasonKind::Semantic).to_string(),
                        message: dispatched.output.clone(),
                    });
                }
                self.events.append(EventKind::ActionResult {
                    tool: dispatched.tool.clone(),
                    success: dispatched.success,
                    output: dispatched.output.clone(),
                });
                self.action_log.push(dispatched.tool.clone());
                self.result_log.push(dispatched.output.clone());
                last_results.push(dispatched);

                if self.cancel.is_cancelled() {
                    return Err(CoreError::Cancelled);
                }
            }

            self.apply_phase_transitions(&last_results);

            if let Some(message) = self.pending_task_completed.take() {
                return Ok(message);
            }
        }

        Err(CoreError::IterationLimit(self.loop_config.max_iterations))
    }

    fn append_iteration_user_turn(
        &mut self,
        last_results: &[DispatchOutcome],
        last_rejections: &[(String, String)],
        nudge: bool,
    ) {
        let mut turn = String::new();
        if !last_results.is_empty() {
            turn.push_str("Last action results:\n");
            for r in last_results {
                turn.push_str(&format!("- {} ({}): {}\n", r.tool, if r.success { "ok" } else { "failed" }, r.output));
            }
        }
        if !last_rejections.is_empty() {
            turn.push_str("Rejected actions:\n");
            for (tool, reason) in last_rejections {
                turn.push_str(&format!("- {tool}: {reason}\n"));
            }
        }
        turn.push_str(&format!("Current phase: {}\n", self.phase.as_str()));
        turn.push_str(&format!("Todo excerpt:\n{}\n", self.todo_excerpt()));
        if nudge {
            turn.push_str("No valid ACTION block was found in your last response. Emit one now.\n");
        }
        self.conversation.push(Message::user(turn));
    }

    fn todo_excerpt(&self) -> String {
        self.todo.lines().take(20).collect::<Vec<_>>().join("\n")
    }

    async fn call_llm(&mut self) -> Result<String, CoreError> {
        let mut system = CORE_SYSTEM_PROMPT.to_string();
        system.push('\n');
        system.push_str(&crate::tools::system_prompt_section());
        if !self.accumulated_learnings.is_empty() {
            system.push_str("\nAccumulated session learnings:\n");
            system.push_str(&self.accumulated_learnings);
        }

        let mut messages = vec![Message::system(system)];
        messages.extend(self.conversation.clone());

        self.events.append(EventKind::LlmRequest { phase: self.phase.as_str().to_string(), message_count: messages.len() });

        let bias = crate::tools::bias_for(self.phase, self.loop_config.suppression_strength);
        let request = CompletionRequest::new(&self.model, messages)
            .with_temperature(self.temperature_for(self.phase))
            .with_max_tokens(self.loop_config.max_tokens)
            .with_bias_map(bias)
            .with_cache_hint(self.task.id.clone());

        let response = self.provider.complete(request).await?;
        self.events.append(EventKind::LlmResponse { content_len: response.content.len() });
        Ok(response.content)
    }

    /// Replaces runs of older `action_result`-bearing user turns with one
    /// synthesized summary turn, keeping the last [`RAW_ACTION_RESULTS_KEPT`]
    /// turns raw (§4.11.b).
    fn compress_history(&mut self) {
        if self.conversation.len() <= RAW_ACTION_RESULTS_KEPT {
            return;
        }
        let split = self.conversation.len() - RAW_ACTION_RESULTS_KEPT;
        let (older, recent) = self.conversation.split_at(split);
        let summary = format!(
            "[compressed summary of {} earlier turns: prior actions and their results have been \
             condensed to fit the context window]",
            older.len()
        );
        let mut compressed = vec![Message::user(summary)];
        compressed.extend(recent.iter().cloned());
        self.conversation = compressed;
    }

    // ─── Dispatch ────────────────────────────────────────────────────────

    async fn dispatch(&mut self, action: &Action) -> DispatchOutcome {
        let tool = action.tool.clone();
        match tool.as_str() {
            "CREATE_FILE" => self.dispatch_create_file(action).await,
            "READ_FILE" => self.dispatch_read_file(action).await,
            "LIST_FILES" => self.dispatch_list_files(action).await,
            "EXECUTE" => self.dispatch_execute(action).await,
            "UPDATE_TODO" => self.dispatch_update_todo(action).await,
            "VERIFY" => self.dispatch_verify(action).await,
            "BROWSER" => self.dispatch_browser(action).await,
            "SEARCH_WEB" => self.dispatch_search_web(action).await,
            "DELEGATE" => self.dispatch_delegate(action).await,
            "THINK" => DispatchOutcome { tool, success: true, output: action.param("CONTENT").unwrap_or_default().to_string() },
            "TASK_COMPLETED" => {
                let message = action.param("MESSAGE").unwrap_or("task completed").to_string();
                self.pending_task_completed = Some(message.clone());
                DispatchOutcome { tool, success: true, output: message }
            }
            other => DispatchOutcome { tool: other.to_string(), success: false, output: "unknown tool".to_string() },
        }
    }

    fn workspace_path(&self, path: &str) -> String {
        let root = &self.sandbox_config.workspace_root;
        if path.starts_with(root) {
            path.to_string()
        } else {
            format!("{}/{}", root.trim_end_matches('/'), path.trim_start_matches('/'))
        }
    }

    async fn dispatch_create_file(&mut self, action: &Action) -> DispatchOutcome {
        let Some(handle) = &self.handle else {
            return DispatchOutcome { tool: action.tool.clone(), success: false, output: "no sandbox".to_string() };
        };
        let path = self.workspace_path(action.param("PATH").unwrap_or_default());
        let content = action.param("CONTENT").unwrap_or_default();
        match self.sandbox.write_file(handle, &path, content.as_bytes()).await {
            Ok(()) => DispatchOutcome { tool: action.tool.clone(), success: true, output: format!("wrote {path}") },
            Err(e) => DispatchOutcome { tool: action.tool.clone(), success: false, output: e.human_message() },
        }
    }

    async fn dispatch_read_file(&mut self, action: &Action) -> DispatchOutcome {
        let Some(handle) = &self.handle else {
            return DispatchOutcome { tool: action.tool.clone(), success: false, output: "no sandbox".to_string() };
        };
        let path = self.workspace_path(action.param("PATH").unwrap_or_default());
        match self.sandbox.read_file(handle, &path).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).to_string();
                let (capped, _) = truncate_utf8(&text, READ_FILE_EVENT_CAP_BYTES);
                DispatchOutcome { tool: action.tool.clone(), success: true, output: capped }
            }
            Err(e) => DispatchOutcome { tool: action.tool.clone(), success: false, output: e.human_message() },
        }
    }

    async fn dispatch_list_files(&mut self, action: &Action) -> DispatchOutcome {
        let Some(handle) = &self.handle else {
            return DispatchOutcome { tool: action.tool.clone(), success: false, output: "no sandbox".to_string() };
        };
        let path = self.workspace_path(action.param("PATH").unwrap_or_default());
        match self.sandbox.list_files(handle, &path).await {
            Ok(entries) => {
                let rendered = entries
                    .iter()
                    .map(|e| if e.is_directory { format!("{}/", e.name) } else { e.name.clone() })
                    .collect::<Vec<_>>()
                    .join("\n");
                DispatchOutcome { tool: action.tool.clone(), success: true, output: rendered }
            }
            Err(e) => DispatchOutcome { tool: action.tool.clone(), success: false, output: e.human_message() },
        }
    }

    fn exec_timeout(&self, action: &Action) -> std::time::Duration {
        let requested = action
            .param("TIMEOUT_SECONDS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(self.sandbox_config.default_exec_timeout_secs);
        std::time::Duration::from_secs(requested.min(self.sandbox_config.max_exec_timeout_secs))
    }

    async fn dispatch_execute(&mut self, action: &Action) -> DispatchOutcome {
        let Some(handle) = &self.handle else {
            return DispatchOutcome { tool: action.tool.clone(), success: false, output: "no sandbox".to_string() };
        };
        let command = action.param("COMMAND").unwrap_or_default();
        let timeout = self.exec_timeout(action);
        match self.sandbox.exec(handle, command, &self.sandbox_config.workspace_root, timeout).await {
            Ok(result) => {
                let (stdout, _) = truncate_utf8(&result.stdout, EXEC_OUTPUT_CAP_BYTES);
                let (stderr, _) = truncate_utf8(&result.stderr, EXEC_OUTPUT_CAP_BYTES);
                DispatchOutcome {
                    tool: action.tool.clone(),
                    success: result.exit_code == 0,
                    output: format!("exit={} stdout={stdout} stderr={stderr}", result.exit_code),
                }
            }
            Err(e) => DispatchOutcome { tool: action.tool.clone(), success: false, output: e.human_message() },
        }
    }

    async fn dispatch_update_todo(&mut self, action: &Action) -> DispatchOutcome {
        let content = action.param("CONTENT").unwrap_or_default().to_string();
        self.todo = content.clone();
        if let Some(handle) = &self.handle {
            if let Err(e) = self.sandbox.write_file(handle, "todo.md", content.as_bytes()).await {
                return DispatchOutcome { tool: action.tool.clone(), success: false, output: e.human_message() };
            }
        }
        DispatchOutcome { tool: action.tool.clone(), success: true, output: "todo updated".to_string() }
    }

    async fn dispatch_verify(&mut self, action: &Action) -> DispatchOutcome {
        let Some(handle) = &self.handle else {
            return DispatchOutcome { tool: action.tool.clone(), success: false, output: "no sandbox".to_string() };
        };
        let command = action.param("COMMAND").unwrap_or_default().to_string();
        let timeout = std::time::Duration::from_secs(self.sandbox_config.default_exec_timeout_secs);
        let result = self.sandbox.exec(handle, &command, &self.sandbox_config.workspace_root, timeout).await;
        self.task.verifications_count += 1;
        let is_test = command.contains("test");
        if is_test {
            self.task.tests_count += 1;
        }
        match result {
            Ok(r) => {
                let passed = r.exit_code == 0;
                self.events.append(EventKind::Verification { command: command.clone(), passed });
                if is_test {
                    self.events.append(EventKind::Test { command: command.clone(), passed });
                }
                let (stdout, _) = truncate_utf8(&r.stdout, EXEC_OUTPUT_CAP_BYTES);
                DispatchOutcome { tool: action.tool.clone(), success: passed, output: stdout }
            }
            Err(e) => {
                self.events.append(EventKind::Verification { command: command.clone(), passed: false });
                if is_test {
                    self.events.append(EventKind::Test { command, passed: false });
                }
                DispatchOutcome { tool: action.tool.clone(), success: false, output: e.human_message() }
            }
        }
    }

    async fn dispatch_browser(&mut self, action: &Action) -> DispatchOutcome {
        let Some(browser) = self.collaborators.browser_agent else {
            return DispatchOutcome { tool: action.tool.clone(), success: false, output: "browser_unavailable".to_string() };
        };
        let outcome = if let Some(task) = action.param("TASK") {
            browser.run_task(task).await
        } else {
            let kind = match action.param("TOOL").unwrap_or("navigate") {
                "click" => BrowserActionKind::Click,
                "fill" => BrowserActionKind::Fill,
                "extract" => BrowserActionKind::Extract,
                "screenshot" => BrowserActionKind::Screenshot,
                _ => BrowserActionKind::Navigate,
            };
            let structured = StructuredAction {
                kind,
                url: action.param("URL").map(str::to_string),
                selector: action.param("SELECTOR").map(str::to_string),
                value: action.param("VALUE").map(str::to_string),
            };
            browser.run_action(structured).await
        };
        DispatchOutcome { tool: action.tool.clone(), success: outcome.success, output: outcome.output }
    }

    async fn dispatch_search_web(&mut self, action: &Action) -> DispatchOutcome {
        let Some(knowledge) = self.collaborators.knowledge_agent else {
            return DispatchOutcome { tool: action.tool.clone(), success: false, output: "knowledge_unavailable".to_string() };
        };
        let query = action.param("QUERY").unwrap_or_default();
        let max_results = action.param("MAX_RESULTS").and_then(|s| s.parse::<usize>().ok()).unwrap_or(5);
        let depth = match action.param("DEPTH").unwrap_or("quick") {
            "medium" => Depth::Medium,
            "deep" => Depth::Deep,
            _ => Depth::Quick,
        };
        let outcome = knowledge.research(query, depth, max_results).await;
        let mut rendered = outcome.answer;
        if !outcome.insights.is_empty() {
            rendered.push_str("\nInsights:\n");
            for i in &outcome.insights {
                rendered.push_str(&format!("- {i}\n"));
            }
        }
        DispatchOutcome { tool: action.tool.clone(), success: true, output: rendered }
    }

    async fn dispatch_delegate(&mut self, action: &Action) -> DispatchOutcome {
        let Some(orchestrator) = self.collaborators.orchestrator else {
            return DispatchOutcome { tool: action.tool.clone(), success: false, output: "orchestrator_unavailable".to_string() };
        };
        let agent_kind = action.param("AGENT_KIND").unwrap_or_default().to_string();
        let input = action.param("TASK").unwrap_or_default().to_string();
        let strict = action.param("SHAPE").map(|s| s == "strict").unwrap_or(false);
        let subtask = SubTask { agent_kind: agent_kind.clone(), input };
        let results = orchestrator.run_sequential(vec![subtask], strict).await;
        match results.into_iter().next() {
            Some(result) => {
                self.collaborators.interaction_log.record(Interaction {
                    id: uuid::Uuid::new_v4().to_string(),
                    agent_kind,
                    description: action.param("TASK").unwrap_or_default().to_string(),
                    success: result.success,
                    duration_ms: 0,
                    iterations_used: 1,
                    error_count: if result.success { 0 } else { 1 },
                    actions: vec!["DELEGATE".to_string()],
                    results: vec![result.output.clone()],
                    tags: Vec::new(),
                    recorded_at: chrono::Utc::now(),
                });
                DispatchOutcome { tool: action.tool.clone(), success: result.success, output: result.output }
            }
            None => DispatchOutcome { tool: action.tool.clone(), success: false, output: "no result".to_string() },
        }
    }

    // ─── Phase transitions ──────────────────────────────────────────────

    fn apply_phase_transitions(&mut self, results: &[DispatchOutcome]) {
        if self.pending_task_completed.is_some() {
            self.set_phase(Phase::Learning);
            return;
        }

        match self.phase {
            Phase::Executing => {
                let had_success = results.iter().any(|r| r.success && (r.tool == "CREATE_FILE" || r.tool == "EXECUTE"));
                if had_success {
                    self.set_phase(Phase::Verifying);
                }
            }
            Phase::Verifying => {
                // Both outcomes return to EXECUTING (§4.11.e); only the
                // `passed` flag recorded on the verification event differs.
                if results.iter().any(|r| r.tool == "VERIFY") {
                    self.set_phase(Phase::Executing);
                }
            }
            _ => {}
        }
    }

    // ─── Finalization ────────────────────────────────────────────────────

    async fn finalize_success(&mut self, message: String) -> TaskStatus {
        self.task.touch(TaskStatus::Learning);
        self.record_interaction(true);
        self.reflect().await;
        self.collaborators.strategy.record_outcome(
            &self.task.description,
            Vec::new(),
            self.chosen_shape,
            true,
            (self.elapsed_ms() / 1000) as u64,
        );
        self.collaborators.performance.record(
            "coder",
            &self.task_category,
            self.elapsed_ms(),
            self.task.iterations_used as u64,
            true,
        );
        self.events.append(EventKind::TaskCompleted { message });
        self.destroy_sandbox().await;
        self.task.touch(TaskStatus::Completed);
        self.events.close();
        TaskStatus::Completed
    }

    async fn fail(&mut self, error: CoreError) -> TaskStatus {
        let reason = error.reason_kind();
        let status = if matches!(reason, ReasonKind::Cancelled) {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Failed
        };

        if !matches!(reason, ReasonKind::Cancelled) {
            self.task.touch(TaskStatus::Learning);
            self.record_interaction(false);
            self.collaborators.strategy.record_outcome(
                &self.task.description,
                Vec::new(),
                self.chosen_shape,
                false,
                (self.elapsed_ms() / 1000) as u64,
            );
            self.collaborators.performance.record(
                "coder",
                &self.task_category,
                self.elapsed_ms(),
                self.task.iterations_used as u64,
                false,
            );
            self.events.append(EventKind::TaskFailed {
                reason_kind: reason.as_str().to_string(),
                human_message: error.human_message(),
                last_action: None,
            });
        } else {
            self.events.append(EventKind::TaskCancelled);
        }

        self.destroy_sandbox().await;
        self.task.touch(status);
        self.events.close();
        status
    }

    fn elapsed_ms(&self) -> i64 {
        self.started_at.map(|t| t.elapsed().as_millis() as i64).unwrap_or(0)
    }

    fn record_interaction(&self, success: bool) {
        let learning = self.collaborators.interaction_log.record(Interaction {
            id: uuid::Uuid::new_v4().to_string(),
            agent_kind: "coder".to_string(),
            description: self.task.description.clone(),
            success,
            duration_ms: self.elapsed_ms(),
            iterations_used: self.task.iterations_used,
            error_count: self.task.errors_count,
            actions: self.action_log.clone(),
            results: self.result_log.clone(),
            tags: Vec::new(),
            recorded_at: chrono::Utc::now(),
        });
        if let Some(learning) = learning {
            self.events.append(EventKind::LearningRecorded { summary: learning.summary });
        }
    }

    async fn reflect(&mut self) {
        let prompt = format!(
            "The task \"{}\" just completed. In 2-4 sentences, reflect on what worked, what didn't, \
             and any lesson for similar future tasks.",
            self.task.description
        );
        let request = CompletionRequest::new(&self.model, vec![Message::user(prompt)]);
        let narrative = match self.provider.complete(request).await {
            Ok(response) => response.content,
            Err(_) => "no reflection available".to_string(),
        };
        self.accumulated_learnings.push_str(&narrative);
        self.accumulated_learnings.push('\n');

        let tags = extract_tags(&self.task.description);
        let title = format!("lesson: {}", self.task.description);
        let shared = self.collaborators.knowledge_hub.share(
            "reflection",
            title,
            narrative.clone(),
            Priority::Low,
            tags.clone(),
        );
        self.events.append(EventKind::KnowledgeShared { title: shared.title, tags });

        self.events.append(EventKind::Reflection { narrative });
    }

    async fn destroy_sandbox(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.sandbox.destroy(&handle).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::ai::types::CompletionResponse;
    use crate::sandbox::{ExecResult, FileEntry};

    struct ScriptedSandbox {
        files: Mutex<std::collections::HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl SandboxClient for ScriptedSandbox {
        async fn create(&self) -> Result<SandboxHandle, CoreError> {
            Ok(SandboxHandle { id: "sbx-1".to_string(), workspace_root: "/workspace".to_string() })
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
        async fn exec(&self, _h: &SandboxHandle, _command: &str, _workdir: &str, _timeout: Duration) -> Result<ExecResult, CoreError> {
            Ok(ExecResult { exit_code: 0, stdout: "ok".to_string(), stderr: String::new(), duration: Duration::from_millis(1), truncated: false })
        }
        async fn destroy(&self, _h: &SandboxHandle) -> Result<(), CoreError> {
            Ok(())
        }
    }

    struct ScriptedProvider {
        responses: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            let content = if responses.is_empty() { "ACTION: TASK_COMPLETED\nMESSAGE: done\n---END---".to_string() } else { responses.remove(0) };
            Ok(CompletionResponse { content, model: "test".to_string(), usage: None, finish_reason: None })
        }
        fn context_limit(&self) -> usize {
            128_000
        }
        fn provider_name(&self) -> &str {
            "scripted"
        }
    }

    fn collaborators<'a>(
        log: &'a InteractionLog,
        hub: &'a KnowledgeHub,
        errors: &'a ErrorPatternStore,
        strategy: &'a AdaptiveStrategy,
        performance: &'a PerformanceOptimizer,
    ) -> Collaborators<'a> {
        Collaborators {
            interaction_log: log,
            knowledge_hub: hub,
            error_patterns: errors,
            strategy,
            performance,
            knowledge_agent: None,
            browser_agent: None,
            orchestrator: None,
        }
    }

    #[tokio::test]
    async fn happy_path_creates_file_then_completes() {
        let sandbox = ScriptedSandbox { files: Mutex::new(std::collections::HashMap::new()) };
        let provider = ScriptedProvider {
            responses: Mutex::new(vec![
                "ACTION: CREATE_FILE\nPATH: main.rs\nCONTENT: fn main() {}\n---END---".to_string(),
                "ACTION: VERIFY\nCOMMAND: cargo test\n---END---".to_string(),
                "ACTION: TASK_COMPLETED\nMESSAGE: all done\n---END---".to_string(),
            ]),
            calls: AtomicUsize::new(0),
        };
        let log = InteractionLog::new();
        let hub = KnowledgeHub::new();
        let errors = ErrorPatternStore::new();
        let strategy = AdaptiveStrategy::new();
        let performance = PerformanceOptimizer::new();

        let mut agent_loop = AgentLoop::new(
            "task-1",
            "build a hello world",
            &sandbox,
            &provider,
            "test-model",
            collaborators(&log, &hub, &errors, &strategy, &performance),
            LoopConfig::default(),
            SandboxConfig::default(),
            false,
            CancelToken::new(),
        );

        let events = agent_loop.events();
        let status = agent_loop.run().await;
        assert_eq!(status, TaskStatus::Completed);
        assert!(sandbox.files.lock().unwrap().contains_key("/workspace/main.rs"));
        assert!(performance.metrics_for("coder", "simple").is_some());
        assert!(events.snapshot().iter().any(|e| matches!(e.kind, EventKind::Test { .. })));
        assert!(events.snapshot().iter().any(|e| matches!(e.kind, EventKind::KnowledgeShared { .. })));
        assert!(!hub.items().is_empty());
    }

    #[tokio::test]
    async fn cancellation_is_observed_before_llm_call() {
        let sandbox = ScriptedSandbox { files: Mutex::new(std::collections::HashMap::new()) };
        let provider = ScriptedProvider { responses: Mutex::new(vec![]), calls: AtomicUsize::new(0) };
        let log = InteractionLog::new();
        let hub = KnowledgeHub::new();
        let errors = ErrorPatternStore::new();
        let strategy = AdaptiveStrategy::new();
        let performance = PerformanceOptimizer::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut agent_loop = AgentLoop::new(
            "task-2",
            "do something",
            &sandbox,
            &provider,
            "test-model",
            collaborators(&log, &hub, &errors, &strategy, &performance),
            LoopConfig::default(),
            SandboxConfig::default(),
            false,
            cancel,
        );

        let status = agent_loop.run().await;
        assert_eq!(status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn iteration_limit_fails_the_task() {
        let sandbox = ScriptedSandbox { files: Mutex::new(std::collections::HashMap::new()) };
        let provider = ScriptedProvider {
            responses: Mutex::new(vec!["THINK without an action block".to_string(); 10]),
            calls: AtomicUsize::new(0),
        };
        let log = InteractionLog::new();
        let hub = KnowledgeHub::new();
        let errors = ErrorPatternStore::new();
        let strategy = AdaptiveStrategy::new();
        let performance = PerformanceOptimizer::new();
        let mut loop_config = LoopConfig::default();
        loop_config.max_iterations = 3;

        let mut agent_loop = AgentLoop::new(
            "task-3",
            "a vague task",
            &sandbox,
            &provider,
            "test-model",
            collaborators(&log, &hub, &errors, &strategy, &performance),
            loop_config,
            SandboxConfig::default(),
            false,
            CancelToken::new(),
        );

        let status = agent_loop.run().await;
        assert_eq!(status, TaskStatus::Failed);
    }
}
