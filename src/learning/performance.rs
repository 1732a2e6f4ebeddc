//! Performance Optimizer (§4.9.3): per (agent-kind, task-category) rolling
//! metrics, used to recommend interventions once enough samples exist.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Minimum sample size before `recommend` will emit anything (§4.9.3).
const MIN_SAMPLE_SIZE: u32 = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: u32,
    pub total_duration_ms: i64,
    pub total_iterations: u64,
    pub successes: u32,
    pub errors: u32,
}

impl Metrics {
    pub fn mean_duration_ms(&self) -> f64 {
        if self.samples == 0 { 0.0 } else { self.total_duration_ms as f64 / self.samples as f64 }
    }

    pub fn mean_iterations(&self) -> f64 {
        if self.samples == 0 { 0.0 } else { self.total_iterations as f64 / self.samples as f64 }
    }

    pub fn success_rate(&self) -> f64 {
        if self.samples == 0 { 1.0 } else { self.successes as f64 / self.samples as f64 }
    }

    pub fn error_rate(&self) -> f64 {
        if self.samples == 0 { 0.0 } else { self.errors as f64 / self.samples as f64 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: u8,
    pub message: String,
}

pub struct PerformanceOptimizer {
    metrics: RwLock<HashMap<(String, String), Metrics>>,
}

impl Default for PerformanceOptimizer {
    fn default() -> Self {
        Self { metrics: RwLock::new(HashMap::new()) }
    }
}

impl PerformanceOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, agent_kind: &str, task_category: &str, duration_ms: i64, iterations: u64, success: bool) {
        let mut map = self.metrics.write().expect("lock");
        let entry = map.entry((agent_kind.to_string(), task_category.to_string())).or_default();
        entry.samples += 1;
        entry.total_duration_ms += duration_ms;
        entry.total_iterations += iterations;
        if success {
            entry.successes += 1;
        } else {
            entry.errors += 1;
        }
    }

    pub fn metrics_for(&self, agent_kind: &str, task_category: &str) -> Option<Metrics> {
        self.metrics
            .read()
            .expect("lock")
            .get(&(agent_kind.to_string(), task_category.to_string()))
            .cloned()
    }

    /// Returns ordered recommendations (highest priority first) for
    /// `agent_kind` whose metrics fall below thresholds, once sample size
    /// ≥ 5 (§4.9.3). Only recommendations at or above `min_priority` are
    /// returned.
    pub fn recommend(&self, agent_kind: &str, min_priority: u8) -> Vec<Recommendation> {
        let map = self.metrics.read().expect("lock");
        let mut recs: Vec<Recommendation> = map
            .iter()
            .filter(|((agent, _), m)| agent == agent_kind && m.samples >= MIN_SAMPLE_SIZE)
            .flat_map(|((_, category), m)| {
                let mut out = Vec::new();
                if m.success_rate() < 0.7 {
                    out.push(Recommendation {
                        priority: 8,
                        message: format!("investigate failures in category '{category}' (success_rate={:.2})", m.success_rate()),
                    });
                }
                if m.error_rate() > 0.3 {
                    out.push(Recommendation {
                        priority: 6,
                        message: format!("elevated error rate in category '{category}' ({:.2})", m.error_rate()),
                    });
                }
                if m.mean_iterations() > 50.0 {
                    out.push(Recommendation {
                        priority: 4,
                        message: format!("category '{category}' runs long (mean {:.1} iterations)", m.mean_iterations()),
                    });
                }
                out
            })
            .filter(|r| r.priority >= min_priority)
            .collect();
        recs.sort_by(|a, b| b.priority.cmp(&a.priority));
        recs
    }
}
