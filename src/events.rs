//! Event Stream (C10): an append-only, per-task sequence with fan-out to
//! subscribers, grounded on a `tokio::sync::broadcast` channel.
//!
//! The stream is the single source of truth for external observers (§4.10):
//! `append` assigns the next monotonic sequence number, `subscribe` hands out
//! a receiver that sees every event from that point forward, `snapshot`
//! returns the full history so far, and `close` marks the stream terminal.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Default subscriber buffer depth (§6.5); a lagged subscriber is dropped
/// with a `subscriber_lagged` terminal event rather than blocking the
/// publisher.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// The kinds of events a task's stream carries, exactly the set in §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    PhaseChanged { from: String, to: String },
    PlanCreated { goal: String, step_count: usize },
    IterationStarted { iteration: usize },
    LlmRequest { phase: String, message_count: usize },
    LlmResponse { content_len: usize },
    ActionParsed { tool: String, seq_index: usize },
    ActionRejected { tool: String, reason: String },
    ActionResult { tool: String, success: bool, output: String },
    Verification { command: String, passed: bool },
    Test { command: String, passed: bool },
    ErrorRecorded { kind: String, message: String },
    LearningRecorded { summary: String },
    KnowledgeShared { title: String, tags: Vec<String> },
    Reflection { narrative: String },
    TaskCompleted { message: String },
    TaskFailed { reason_kind: String, human_message: String, last_action: Option<String> },
    TaskCancelled,
    SubscriberLagged { skipped: u64 },
}

/// One record in a task's append-only stream. Never modified or deleted once
/// appended (§3 Event invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub task_id: String,
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// Render as the client-facing JSON shape from §6.1:
    /// `{type, task_id, seq, ts, …payload}`.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn is_terminal(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::TaskCompleted { .. } | EventKind::TaskFailed { .. } | EventKind::TaskCancelled
    )
}

/// Append-only per-task event stream. Cheap to clone (`Arc` internals);
/// cloning shares the same backing sequence and broadcast channel.
#[derive(Clone)]
pub struct EventStream {
    task_id: String,
    sender: broadcast::Sender<Event>,
    history: Arc<Mutex<Vec<Event>>>,
    next_seq: Arc<Mutex<u64>>,
    closed: Arc<Mutex<bool>>,
}

impl EventStream {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self::with_buffer(task_id, DEFAULT_SUBSCRIBER_BUFFER)
    }

    pub fn with_buffer(task_id: impl Into<String>, buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self {
            task_id: task_id.into(),
            sender,
            history: Arc::new(Mutex::new(Vec::new())),
            next_seq: Arc::new(Mutex::new(0)),
            closed: Arc::new(Mutex::new(false)),
        }
    }

    /// Appends `kind`, assigning the next monotonic sequence number.
    /// No-op on an already-closed stream.
    pub fn append(&self, kind: EventKind) -> u64 {
        let mut seq_guard = self.next_seq.lock().expect("lock");
        let seq = *seq_guard;
        *seq_guard += 1;
        drop(seq_guard);

        let event = Event {
            task_id: self.task_id.clone(),
            seq,
            ts: Utc::now(),
            kind,
        };

        self.history.lock().expect("lock").push(event.clone());

        // A broadcast send failing (no receivers) is not an error — events
        // are still recorded in history for snapshot()/late subscribers.
        let _ = self.sender.send(event);
        seq
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Full history recorded so far, in append order.
    pub fn snapshot(&self) -> Vec<Event> {
        self.history.lock().expect("lock").clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().expect("lock")
    }

    /// Marks the stream terminal. Idempotent (§4.12 cancellation semantics
    /// require `close` to be safe to call more than once).
    pub fn close(&self) {
        *self.closed.lock().expect("lock") = true;
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

/// Drains `rx` until a `subscriber_lagged`-worthy overflow, recording a
/// terminal `subscriber_lagged` event on the owning stream. Call sites that
/// actually stream events to a client (e.g. the CLI wrapper) drive this;
/// the stream itself never drops history on overflow, only broadcast
/// delivery to a slow subscriber.
pub async fn forward_until_lagged<F: FnMut(Event)>(
    stream: &EventStream,
    mut rx: broadcast::Receiver<Event>,
    mut on_event: F,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let terminal = is_terminal(&event.kind);
                on_event(event);
                if terminal {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                stream.append(EventKind::SubscriberLagged { skipped });
                break;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_assigns_monotonic_sequence() {
        let stream = EventStream::new("task-1");
        let s0 = stream.append(EventKind::IterationStarted { iteration: 0 });
        let s1 = stream.append(EventKind::IterationStarted { iteration: 1 });
        assert_eq!(s0, 0);
        assert_eq!(s1, 1);
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let stream = EventStream::new("task-1");
        let mut rx = stream.subscribe();
        stream.append(EventKind::PhaseChanged { from: "idle".into(), to: "planning".into() });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.seq, 0);
    }

    #[tokio::test]
    async fn snapshot_returns_full_history() {
        let stream = EventStream::new("task-1");
        stream.append(EventKind::IterationStarted { iteration: 0 });
        stream.append(EventKind::IterationStarted { iteration: 1 });
        assert_eq!(stream.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn lagged_subscriber_is_reported() {
        let stream = EventStream::with_buffer("task-1", 1);
        let rx = stream.subscribe();
        stream.append(EventKind::IterationStarted { iteration: 0 });
        stream.append(EventKind::IterationStarted { iteration: 1 });

        let mut seen = Vec::new();
        forward_until_lagged(&stream, rx, |e| seen.push(e)).await;

        let history = stream.snapshot();
        assert!(matches!(history.last().unwrap().kind, EventKind::SubscriberLagged { .. }));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let stream = EventStream::new("task-1");
        stream.close();
        stream.close();
        assert!(stream.is_closed());
    }

    #[test]
    fn event_json_shape_matches_client_contract() {
        let event = Event {
            task_id: "task-1".into(),
            seq: 3,
            ts: Utc::now(),
            kind: EventKind::TaskCompleted { message: "done".into() },
        };
        let value = event.to_json();
        assert_eq!(value["type"], "task_completed");
        assert_eq!(value["task_id"], "task-1");
        assert_eq!(value["seq"], 3);
        assert_eq!(value["message"], "done");
    }
}
