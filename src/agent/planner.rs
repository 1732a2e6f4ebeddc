//! Planner (C5): one LLM call producing a structured plan and a todo seed.
//!
//! Uses the same stable system prompt as the main loop and does not switch
//! tool sets (§4.5) — the call is made with [`crate::phase::Phase::Planning`]
//! biasing, not a separate prompt template.

use serde::{Deserialize, Serialize};

use crate::ai::provider::LLMProvider;
use crate::ai::types::{CompletionRequest, Message};
use crate::phase::Phase;
use crate::tools::catalog::{bias_for, system_prompt_section};

const PENDING_GLYPH: &str = "\u{2b1c}";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub success_criteria: Vec<String>,
    pub ordered_steps: Vec<String>,
    pub identified_risks: Vec<String>,
    pub required_resources: Vec<String>,
}

impl Plan {
    /// A generic fallback used when the planner call fails outright
    /// (§4.5 "on failure, the loop proceeds with an empty plan").
    pub fn empty_with_seed(task_description: &str) -> Self {
        Plan {
            goal: task_description.to_string(),
            success_criteria: Vec::new(),
            ordered_steps: vec!["complete the task".to_string()],
            identified_risks: Vec::new(),
            required_resources: Vec::new(),
        }
    }
}

/// Renders `plan` into the contents of `todo.md`, one line per step, each
/// prefixed by the pending-status glyph (§4.5).
pub fn render_todo(plan: &Plan) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", plan.goal));

    if !plan.success_criteria.is_empty() {
        out.push_str("## Success criteria\n");
        for c in &plan.success_criteria {
            out.push_str(&format!("- {c}\n"));
        }
        out.push('\n');
    }

    out.push_str("## Steps\n");
    for step in &plan.ordered_steps {
        out.push_str(&format!("{PENDING_GLYPH} {step}\n"));
    }

    if !plan.identified_risks.is_empty() {
        out.push_str("\n## Risks\n");
        for r in &plan.identified_risks {
            out.push_str(&format!("- {r}\n"));
        }
    }

    if !plan.required_resources.is_empty() {
        out.push_str("\n## Required resources\n");
        for r in &plan.required_resources {
            out.push_str(&format!("- {r}\n"));
        }
    }

    out
}

fn planning_prompt(task_description: &str) -> String {
    format!(
        "Produce a structured plan for the following task. Respond with a \
         JSON object with exactly these fields: goal (string), \
         success_criteria (array of strings), ordered_steps (array of \
         strings), identified_risks (array of strings), required_resources \
         (array of strings).\n\nTask: {task_description}"
    )
}

/// Best-effort parse of a planner response into a [`Plan`]. Missing fields
/// default to empty (§4.5); a response with no parseable JSON object at all
/// yields `None` so the caller can fall back to [`Plan::empty_with_seed`].
pub fn parse_plan_response(content: &str) -> Option<Plan> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    let slice = &content[start..=end];
    serde_json::from_str::<Plan>(slice).ok()
}

/// Runs the one-shot planning call: assembles the stable system prompt,
/// issues the request with [`Phase::Planning`] biasing, and parses the
/// response into a [`Plan`] plus its rendered `todo.md` seed.
pub async fn plan(
    provider: &dyn LLMProvider,
    model: &str,
    task_description: &str,
    cache_hint: Option<&str>,
) -> (Plan, String) {
    let system = format!(
        "You are an autonomous software engineering agent.\n\n{}",
        system_prompt_section()
    );
    let mut messages = vec![Message::system(system)];
    messages.push(Message::user(planning_prompt(task_description)));

    let mut request = CompletionRequest::new(model, messages).with_bias_map(bias_for(Phase::Planning, 100));
    if let Some(hint) = cache_hint {
        request = request.with_cache_hint(hint);
    }

    let plan = match provider.complete(request).await {
        Ok(response) => parse_plan_response(&response.content).unwrap_or_else(|| Plan::empty_with_seed(task_description)),
        Err(_) => Plan::empty_with_seed(task_description),
    };

    let todo = render_todo(&plan);
    (plan, todo)
}
