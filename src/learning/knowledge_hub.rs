//! Knowledge Hub (§4.9.2): in-memory topic channels shared across tasks.
//! `share` appends and broadcasts; `query` ranks by a fixed total order —
//! priority desc, then tag overlap, then recency (§9 open-question
//! resolution: the source only sometimes applies priority, this spec fixes
//! the order).

use std::cmp::Ordering;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::jaccard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// A knowledge item's validation lifecycle. §8's knowledge-state-monotonicity
/// invariant: an item in `Validated` only ever moves to `Deprecated`, never
/// back to `Experimental`. `Archived` is terminal and operator-triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeState {
    Experimental,
    Validated,
    Deprecated,
    Archived,
}

/// One prior content snapshot, kept when `update_content` overwrites an
/// item so its edit history is reconstructible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    pub content: String,
    pub change_note: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub content: String,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub state: KnowledgeState,
    pub success_count: u32,
    pub failure_count: u32,
    #[serde(default)]
    pub versions: Vec<VersionEntry>,
    pub shared_at: DateTime<Utc>,
}

impl KnowledgeItem {
    fn usage_count(&self) -> u32 {
        self.success_count + self.failure_count
    }

    fn success_rate(&self) -> f64 {
        let total = self.usage_count();
        if total == 0 {
            return 1.0;
        }
        self.success_count as f64 / total as f64
    }

    /// Demotes a `Validated` item to `Deprecated` when its observed
    /// application success rate drops below `threshold` — the only
    /// direction this state is allowed to move (§8).
    pub fn maybe_deprecate(&mut self, threshold: f64) {
        if self.state == KnowledgeState::Validated && self.success_rate() < threshold {
            self.state = KnowledgeState::Deprecated;
        }
    }
}

struct State {
    items: Vec<KnowledgeItem>,
}

pub struct KnowledgeHub {
    state: RwLock<State>,
    sender: broadcast::Sender<KnowledgeItem>,
}

impl Default for KnowledgeHub {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { state: RwLock::new(State { items: Vec::new() }), sender }
    }
}

impl KnowledgeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KnowledgeItem> {
        self.sender.subscribe()
    }

    pub fn share(
        &self,
        kind: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        priority: Priority,
        tags: Vec<String>,
    ) -> KnowledgeItem {
        let item = KnowledgeItem {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            title: title.into(),
            content: content.into(),
            priority,
            tags,
            state: KnowledgeState::Experimental,
            success_count: 0,
            failure_count: 0,
            versions: Vec::new(),
            shared_at: Utc::now(),
        };
        self.state.write().expect("lock").items.push(item.clone());
        let _ = self.sender.send(item.clone());
        item
    }

    /// `query` ranks by priority desc, then tag overlap with `text` desc,
    /// then recency desc (§4.9.2, §9).
    pub fn query(&self, text: &str, limit: usize) -> Vec<KnowledgeItem> {
        let mut items = self.state.read().expect("lock").items.clone();
        items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| {
                    let score_a = tag_overlap(&a.tags, text);
                    let score_b = tag_overlap(&b.tags, text);
                    score_b.partial_cmp(&score_a).unwrap_or(Ordering::Equal)
                })
                .then_with(|| b.shared_at.cmp(&a.shared_at))
        });
        items.into_iter().take(limit).collect()
    }

    /// Records engagement with an item: a success/failure increment, then
    /// re-evaluates its state (§3 Knowledge Item transitions).
    pub fn record_application(&self, id: &str, succeeded: bool) {
        let mut state = self.state.write().expect("lock");
        if let Some(item) = state.items.iter_mut().find(|i| i.id == id) {
            if succeeded {
                item.success_count += 1;
            } else {
                item.failure_count += 1;
            }
            if item.state == KnowledgeState::Experimental && item.usage_count() >= 5 && item.success_rate() >= 0.8 {
                item.state = KnowledgeState::Validated;
            }
            item.maybe_deprecate(0.4);
        }
    }

    /// Overwrites an item's content, pushing the prior content onto its
    /// version list alongside `change_note`. No-op on an unknown id.
    pub fn update_content(&self, id: &str, new_content: impl Into<String>, change_note: impl Into<String>) {
        let mut state = self.state.write().expect("lock");
        if let Some(item) = state.items.iter_mut().find(|i| i.id == id) {
            let old_content = std::mem::replace(&mut item.content, new_content.into());
            item.versions.push(VersionEntry { content: old_content, change_note: change_note.into(), recorded_at: Utc::now() });
        }
    }

    /// Moves a `Deprecated` item to `Archived` on operator request (§3); the
    /// only caller-triggered (rather than outcome-driven) transition.
    /// Returns `false` if the id is unknown or the item is not deprecated.
    pub fn archive(&self, id: &str) -> bool {
        let mut state = self.state.write().expect("lock");
        match state.items.iter_mut().find(|i| i.id == id) {
            Some(item) if item.state == KnowledgeState::Deprecated => {
                item.state = KnowledgeState::Archived;
                true
            }
            _ => false,
        }
    }

    pub fn items(&self) -> Vec<KnowledgeItem> {
        self.state.read().expect("lock").items.clone()
    }
}

fn tag_overlap(tags: &[String], text: &str) -> f64 {
    if tags.is_empty() {
        return 0.0;
    }
    let joined = tags.join(" ");
    jaccard(&joined, text)
}
