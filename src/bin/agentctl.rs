//! agentctl — headless CLI front-end to the agent execution core.
//!
//! Loads `~/.agent-core/config.toml` (falling back to defaults), submits one
//! task through the session manager, streams its event log to stdout as it
//! runs, and exits with the task's outcome encoded as a process exit code.

use std::process::ExitCode;
use std::sync::Arc;

use agent_core::agent::{AgentLoop, Collaborators};
use agent_core::ai::{OpenAICompatibleConfig, OpenAICompatibleProvider};
use agent_core::config;
use agent_core::error::CoreError;
use agent_core::events::{Event, EventKind};
use agent_core::knowledge::{Depth, DuckDuckGoSearchClient, KnowledgeAgent};
use agent_core::learning::error_patterns::ErrorPatternStore;
use agent_core::learning::interaction_log::InteractionLog;
use agent_core::learning::knowledge_hub::KnowledgeHub;
use agent_core::learning::performance::PerformanceOptimizer;
use agent_core::learning::strategy::AdaptiveStrategy;
use agent_core::logging;
use agent_core::orchestrator::{AgentExecutor, Orchestrator};
use agent_core::sandbox::HttpSandboxClient;
use agent_core::session::SessionManager;
use agent_core::task::{TaskSnapshot, TaskStatus};

use async_trait::async_trait;
use clap::Parser;

/// Adapts the knowledge sub-agent to the `DELEGATE` dispatch surface: owns
/// its own search client and provider handle so it can be registered behind
/// `Arc<dyn AgentExecutor>` independent of the main loop's borrowed
/// [`KnowledgeAgent`] (§4.8 Orchestrator, §4.6).
struct KnowledgeExecutor {
    search_client: Arc<DuckDuckGoSearchClient>,
    provider: Arc<OpenAICompatibleProvider>,
    model: String,
}

#[async_trait]
impl AgentExecutor for KnowledgeExecutor {
    async fn execute(&self, input: &str) -> Result<String, CoreError> {
        let agent = KnowledgeAgent::new(self.search_client.as_ref(), self.provider.as_ref(), self.model.clone());
        let outcome = agent.research(input, Depth::Medium, 5).await;
        Ok(outcome.answer)
    }
}

/// Folds one event into a running snapshot, kept current for `status()`
/// queries for the task's whole lifetime (§4.12, §6.1).
fn apply_event_to_snapshot(snapshot: &mut TaskSnapshot, kind: &EventKind) {
    snapshot.updated_at = chrono::Utc::now();
    match kind {
        EventKind::PhaseChanged { to, .. } => {
            snapshot.status = match to.as_str() {
                "planning" => TaskStatus::Planning,
                "verifying" => TaskStatus::Verifying,
                "learning" => TaskStatus::Learning,
                _ => TaskStatus::Executing,
            };
        }
        EventKind::IterationStarted { iteration } => snapshot.iterations_used = iteration + 1,
        EventKind::Verification { .. } => snapshot.verifications_count += 1,
        EventKind::Test { .. } => snapshot.tests_count += 1,
        EventKind::ErrorRecorded { .. } => snapshot.errors_count += 1,
        EventKind::TaskCompleted { .. } => snapshot.status = TaskStatus::Completed,
        EventKind::TaskFailed { .. } => snapshot.status = TaskStatus::Failed,
        EventKind::TaskCancelled => snapshot.status = TaskStatus::Cancelled,
        _ => {}
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "agentctl",
    about = "Headless runner for the agent execution core",
    version
)]
struct Cli {
    /// The task description handed to the agent as its goal.
    description: String,

    /// Model identifier; defaults to the configured provider's default_model.
    #[arg(long)]
    model: Option<String>,

    /// Emit each event as a JSON line instead of a human-readable summary.
    #[arg(long)]
    json: bool,

    /// Disable the planning call; the loop starts from a generic todo seed.
    #[arg(long)]
    no_plan: bool,
}

fn print_event(event: &Event, json_mode: bool) {
    if json_mode {
        println!("{}", event.to_json());
    } else {
        println!("[{:>4}] {:?}", event.seq, event.kind);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(None);

    let app_config = config::load_default_config();

    if app_config.provider.base_url.is_empty() {
        eprintln!("error: no provider.base_url configured; write ~/.agent-core/config.toml first");
        return ExitCode::from(2);
    }

    let model = cli.model.unwrap_or_else(|| app_config.provider.default_model.clone());

    let provider_config = OpenAICompatibleConfig::new(
        app_config.provider.api_key.clone(),
        app_config.provider.base_url.clone(),
        model.clone(),
    )
    .timeout(std::time::Duration::from_secs(app_config.provider.request_timeout_secs))
    .context_limit(app_config.provider.context_limit);

    let knowledge_provider = match OpenAICompatibleProvider::new(provider_config.clone(), "agentctl-knowledge") {
        Ok(p) => Arc::new(p),
        Err(e) => {
            eprintln!("error: {}", e.human_message());
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    let provider = match OpenAICompatibleProvider::new(provider_config, "agentctl") {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {}", e.human_message());
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    let sandbox = HttpSandboxClient::new(app_config.sandbox.endpoint.clone(), app_config.sandbox.api_key.clone());

    let search_client = Arc::new(DuckDuckGoSearchClient::new());
    let knowledge_agent = KnowledgeAgent::new(search_client.as_ref(), &provider, model.clone());

    let interaction_log = InteractionLog::new();
    let knowledge_hub = KnowledgeHub::new();
    let error_patterns = ErrorPatternStore::new();
    let strategy = AdaptiveStrategy::new();
    let performance = PerformanceOptimizer::new();
    let mut orchestrator = Orchestrator::new();
    orchestrator.register(
        "knowledge",
        Arc::new(KnowledgeExecutor {
            search_client: search_client.clone(),
            provider: knowledge_provider,
            model: model.clone(),
        }) as Arc<dyn AgentExecutor>,
    );

    let collaborators = Collaborators {
        interaction_log: &interaction_log,
        knowledge_hub: &knowledge_hub,
        error_patterns: &error_patterns,
        strategy: &strategy,
        performance: &performance,
        knowledge_agent: Some(&knowledge_agent),
        browser_agent: None,
        orchestrator: Some(&orchestrator),
    };

    let sessions = Arc::new(SessionManager::new());
    let (task_id, cancel, _session_events) = sessions.create(cli.description.clone());

    let mut agent_loop = AgentLoop::new(
        task_id.clone(),
        cli.description.clone(),
        &sandbox,
        &provider,
        model,
        collaborators,
        app_config.loop_.clone(),
        app_config.sandbox.clone(),
        !cli.no_plan && app_config.planner.enabled,
        cancel.clone(),
    );

    let events = agent_loop.events();
    let json_mode = cli.json;
    let mut subscriber = events.subscribe();
    let printer_sessions = sessions.clone();
    let printer_task_id = task_id.clone();
    let printer = tokio::spawn(async move {
        let mut running = printer_sessions.status(&printer_task_id).unwrap_or_else(|| TaskSnapshot {
            task_id: printer_task_id.clone(),
            status: TaskStatus::Planning,
            iterations_used: 0,
            verifications_count: 0,
            tests_count: 0,
            errors_count: 0,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        });
        while let Ok(event) = subscriber.recv().await {
            print_event(&event, json_mode);
            apply_event_to_snapshot(&mut running, &event.kind);
            printer_sessions.update_snapshot(&printer_task_id, running.clone());
        }
    });

    ctrlc_cancel(cancel.clone());

    let status = agent_loop.run().await;
    let _ = printer.await;
    sessions.remove(&task_id);

    match status {
        TaskStatus::Completed => ExitCode::SUCCESS,
        TaskStatus::Cancelled => ExitCode::from(130),
        _ => ExitCode::from(5),
    }
}

/// Installs a Ctrl-C handler that trips the task's cancel token once. Best
/// effort: on platforms where the handler can't be installed this is a
/// no-op and the task simply runs to completion or its iteration limit.
fn ctrlc_cancel(cancel: agent_core::task::CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
}
