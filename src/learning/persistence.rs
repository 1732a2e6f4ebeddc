//! Schema-versioned JSON persistence for the learning stores (§6.4).
//!
//! Each store is written to its own `<store>.v1.json` document under a state
//! directory, following the config loader's atomic-write idiom: write to
//! `<path>.tmp` then rename. Loaders refuse a document whose major version
//! does not match the one this build writes.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error_patterns::ErrorPattern;
use super::interaction_log::{Interaction, Learning};
use super::knowledge_hub::KnowledgeItem;
use super::performance::Metrics;
use super::strategy::StrategyAnalysis;
use crate::error::CoreError;

/// Current major schema version written by this build.
const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    data: Value,
}

fn state_dir() -> Result<PathBuf, CoreError> {
    dirs::home_dir()
        .map(|h| h.join(".agent-core").join("learning"))
        .ok_or_else(|| CoreError::Configuration("could not determine home directory".to_string()))
}

fn store_path(dir: &Path, store: &str) -> PathBuf {
    dir.join(format!("{store}.v1.json"))
}

/// Atomically writes `data` as `<store>.v1.json` under `dir` (§6.4).
fn write_envelope(dir: &Path, store: &str, data: Value) -> Result<(), CoreError> {
    fs::create_dir_all(dir).map_err(|e| CoreError::Configuration(format!("failed to create state dir: {e}")))?;

    let envelope = Envelope { version: CURRENT_VERSION, data };
    let content = serde_json::to_string_pretty(&envelope)
        .map_err(|e| CoreError::Configuration(format!("failed to serialize {store}: {e}")))?;

    let path = store_path(dir, store);
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &content).map_err(|e| CoreError::Configuration(format!("failed to write {store}: {e}")))?;
    fs::rename(&tmp_path, &path).map_err(|e| CoreError::Configuration(format!("failed to replace {store}: {e}")))?;
    Ok(())
}

/// Reads `<store>.v1.json` under `dir`, refusing any major version other
/// than [`CURRENT_VERSION`] (§6.4). Returns `Ok(None)` if the file is absent.
fn read_envelope(dir: &Path, store: &str) -> Result<Option<Value>, CoreError> {
    let path = store_path(dir, store);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CoreError::Configuration(format!("failed to read {store}: {e}"))),
    };

    let envelope: Envelope = serde_json::from_str(&content)
        .map_err(|e| CoreError::Configuration(format!("failed to parse {store}: {e}")))?;

    if envelope.version != CURRENT_VERSION {
        return Err(CoreError::Configuration(format!(
            "{store}.v1.json has unsupported schema version {} (expected {CURRENT_VERSION})",
            envelope.version
        )));
    }

    Ok(Some(envelope.data))
}

/// A flattened snapshot of every learning store, used for `export`/`import`
/// of the full task-boundary persistence set (SUPPLEMENT-1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningSnapshot {
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    #[serde(default)]
    pub learnings: Vec<Learning>,
    #[serde(default)]
    pub knowledge_items: Vec<KnowledgeItem>,
    #[serde(default)]
    pub performance: Vec<((String, String), Metrics)>,
    #[serde(default)]
    pub strategy_analyses: Vec<StrategyAnalysis>,
    #[serde(default)]
    pub error_patterns: Vec<ErrorPattern>,
}

/// Writes each non-empty section of `snapshot` to its own store document
/// under `dir` (or the default state directory when `dir` is `None`).
pub fn export(dir: Option<&Path>, snapshot: &LearningSnapshot) -> Result<(), CoreError> {
    let owned;
    let dir = match dir {
        Some(d) => d,
        None => {
            owned = state_dir()?;
            &owned
        }
    };

    write_envelope(dir, "interaction_log", serde_json::json!({
        "interactions": snapshot.interactions,
        "learnings": snapshot.learnings,
    }))?;
    write_envelope(dir, "knowledge_hub", serde_json::json!({ "items": snapshot.knowledge_items }))?;
    write_envelope(dir, "performance", serde_json::json!({ "metrics": snapshot.performance }))?;
    write_envelope(dir, "strategy", serde_json::json!({ "analyses": snapshot.strategy_analyses }))?;
    write_envelope(dir, "error_patterns", serde_json::json!({ "patterns": snapshot.error_patterns }))?;
    Ok(())
}

/// Reads back whatever store documents exist under `dir` into a
/// [`LearningSnapshot`]; missing files leave the corresponding section empty.
pub fn import(dir: Option<&Path>) -> Result<LearningSnapshot, CoreError> {
    let owned;
    let dir = match dir {
        Some(d) => d,
        None => {
            owned = state_dir()?;
            &owned
        }
    };

    let mut snapshot = LearningSnapshot::default();

    if let Some(value) = read_envelope(dir, "interaction_log")? {
        snapshot.interactions = serde_json::from_value(value["interactions"].clone()).unwrap_or_default();
        snapshot.learnings = serde_json::from_value(value["learnings"].clone()).unwrap_or_default();
    }
    if let Some(value) = read_envelope(dir, "knowledge_hub")? {
        snapshot.knowledge_items = serde_json::from_value(value["items"].clone()).unwrap_or_default();
    }
    if let Some(value) = read_envelope(dir, "performance")? {
        snapshot.performance = serde_json::from_value(value["metrics"].clone()).unwrap_or_default();
    }
    if let Some(value) = read_envelope(dir, "strategy")? {
        snapshot.strategy_analyses = serde_json::from_value(value["analyses"].clone()).unwrap_or_default();
    }
    if let Some(value) = read_envelope(dir, "error_patterns")? {
        snapshot.error_patterns = serde_json::from_value(value["patterns"].clone()).unwrap_or_default();
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn export_then_import_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut snapshot = LearningSnapshot::default();
        snapshot.knowledge_items.push(KnowledgeItem {
            id: "abc".to_string(),
            kind: "tip".to_string(),
            title: "t".to_string(),
            content: "c".to_string(),
            priority: super::super::knowledge_hub::Priority::Medium,
            tags: vec!["rust".to_string()],
            state: super::super::knowledge_hub::KnowledgeState::Experimental,
            success_count: 0,
            failure_count: 0,
            versions: Vec::new(),
            shared_at: chrono::Utc::now(),
        });

        export(Some(dir.path()), &snapshot).unwrap();
        let restored = import(Some(dir.path())).unwrap();
        assert_eq!(restored.knowledge_items.len(), 1);
        assert_eq!(restored.knowledge_items[0].id, "abc");
    }

    #[test]
    fn import_missing_directory_returns_empty_snapshot() {
        let dir = TempDir::new().unwrap();
        let restored = import(Some(dir.path())).unwrap();
        assert!(restored.interactions.is_empty());
        assert!(restored.knowledge_items.is_empty());
    }

    #[test]
    fn import_rejects_unsupported_major_version() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path()).unwrap();
        let bad = serde_json::json!({ "version": 99, "data": { "interactions": [], "learnings": [] } });
        fs::write(dir.path().join("interaction_log.v1.json"), bad.to_string()).unwrap();

        let result = import(Some(dir.path()));
        assert!(result.is_err());
    }
}
