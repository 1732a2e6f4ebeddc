//! Task: an execution instance owned exclusively by the loop that runs it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Planning,
    Executing,
    Verifying,
    Learning,
    Completed,
    Failed,
    Cancelled,
}

/// A snapshot of a task's public state, returned by `status(task_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub iterations_used: usize,
    pub verifications_count: usize,
    pub tests_count: usize,
    pub errors_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A one-shot cancellation signal shared between the session manager and the
/// loop that owns the task. Checked, never blocked on.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The live, mutable state of one task. Mutated only by the loop that owns
/// it (§3 ownership invariant); the session manager holds a read-mostly
/// handle via `Arc<RwLock<Task>>` to serve `status()` queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub iterations_used: usize,
    pub verifications_count: usize,
    pub tests_count: usize,
    pub errors_count: usize,
}

impl Task {
    pub fn new(id: TaskId, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            description: description.into(),
            status: TaskStatus::Queued,
            created_at: now,
            updated_at: now,
            iterations_used: 0,
            verifications_count: 0,
            tests_count: 0,
            errors_count: 0,
        }
    }

    pub fn touch(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id.clone(),
            status: self.status,
            iterations_used: self.iterations_used,
            verifications_count: self.verifications_count,
            tests_count: self.tests_count,
            errors_count: self.errors_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}
