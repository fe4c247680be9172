//! §2: MetricsRegistry collaborator — counters/histograms of request
//! outcomes. Kept as a trait so the handler/orchestrator never depend on a
//! concrete metrics vendor (§1 Non-goals).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub trait MetricsRegistry: Send + Sync {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]);
    fn observe_duration_ms(&self, name: &str, labels: &[(&str, &str)], value_ms: f64);
}

/// Used when `METRICS_ENABLED=false`.
pub struct NoopMetrics;

impl MetricsRegistry for NoopMetrics {
    fn increment_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}
    fn observe_duration_ms(&self, _name: &str, _labels: &[(&str, &str)], _value_ms: f64) {}
}

fn label_key(name: &str, labels: &[(&str, &str)]) -> String {
    let mut key = name.to_string();
    for (k, v) in labels {
        key.push('{');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
        key.push('}');
    }
    key
}

/// Simple in-memory registry, sufficient for the process-local metric
/// assertions in §8 (e.g. `fallback_used=true`); a real deployment wires a
/// vendor-specific registry behind the same trait (§1 Non-goals).
#[derive(Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<String, u64>>,
    durations: Mutex<HashMap<String, Vec<f64>>>,
}

impl InMemoryMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = label_key(name, labels);
        *self.counters.lock().get(&key).unwrap_or(&0)
    }
}

impl MetricsRegistry for InMemoryMetrics {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let key = label_key(name, labels);
        *self.counters.lock().entry(key).or_insert(0) += 1;
    }

    fn observe_duration_ms(&self, name: &str, labels: &[(&str, &str)], value_ms: f64) {
        let key = label_key(name, labels);
        self.durations.lock().entry(key).or_default().push(value_ms);
    }
}
