//! Session Manager (C12): tracks live tasks by identifier.
//!
//! Owns no execution logic itself — the caller spawns the actual
//! [`crate::agent::AgentLoop`] on its own task and feeds snapshot updates
//! back in via [`SessionManager::update_snapshot`]; this module is purely
//! the addressable registry §4.12 describes.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::events::{Event, EventStream};
use crate::task::{CancelToken, TaskId, TaskSnapshot, TaskStatus};

struct SessionEntry {
    snapshot: RwLock<TaskSnapshot>,
    cancel: CancelToken,
    events: EventStream,
}

/// Registry of live and recently-finished tasks. Process-wide; cheap to
/// share behind an `Arc` across the client-facing boundary (§6.1).
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<TaskId, SessionEntry>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new task and returns its id plus the [`CancelToken`] and
    /// [`EventStream`] the spawned loop should be constructed with.
    pub fn create(&self, _description: impl Into<String>) -> (TaskId, CancelToken, EventStream) {
        let task_id = Uuid::new_v4().to_string();
        let cancel = CancelToken::new();
        let events = EventStream::new(task_id.clone());
        let now = chrono::Utc::now();
        let snapshot = TaskSnapshot {
            task_id: task_id.clone(),
            status: TaskStatus::Queued,
            iterations_used: 0,
            verifications_count: 0,
            tests_count: 0,
            errors_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.sessions.write().expect("lock").insert(
            task_id.clone(),
            SessionEntry { snapshot: RwLock::new(snapshot), cancel: cancel.clone(), events: events.clone() },
        );
        (task_id, cancel, events)
    }

    /// Subscribes to `task_id`'s event stream, from this point forward.
    pub fn attach(&self, task_id: &str) -> Option<broadcast::Receiver<Event>> {
        self.sessions.read().expect("lock").get(task_id).map(|e| e.events.subscribe())
    }

    /// Delivers the one-shot cancellation signal; returns `false` if no such
    /// task is tracked.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.sessions.read().expect("lock").get(task_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn status(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.sessions.read().expect("lock").get(task_id).map(|e| e.snapshot.read().expect("lock").clone())
    }

    /// Called by the task's owner after each iteration and at finalization
    /// to keep `status()` queries current.
    pub fn update_snapshot(&self, task_id: &str, snapshot: TaskSnapshot) {
        if let Some(entry) = self.sessions.read().expect("lock").get(task_id) {
            *entry.snapshot.write().expect("lock") = snapshot;
        }
    }

    /// Drops a finished task's registry entry. Its event history is not
    /// retained past this call — callers needing durable history should
    /// have consumed `snapshot()` beforehand.
    pub fn remove(&self, task_id: &str) {
        self.sessions.write().expect("lock").remove(task_id);
    }
}
