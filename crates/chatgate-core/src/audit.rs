//! §4.1: append-only audit trail for AccessGate decisions. Process-wide,
//! shared, concurrency-safe (§3 ownership rules).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub ts: DateTime<Utc>,
    pub user_id: String,
    pub org_id: String,
    pub route: String,
    pub method: String,
    pub tier: String,
    pub outcome: AuditOutcome,
    pub reason: Option<String>,
}

/// Collaborator interface (§1: "treated as opaque interfaces"). The gateway
/// only ever needs to append and, for tests, read back.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Default in-process implementation; bounded so a long-running gateway
/// doesn't grow this unboundedly when no external sink is wired in.
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    capacity: usize,
}

impl InMemoryAuditSink {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            capacity,
        })
    }

    pub fn recent(&self, count: usize) -> Vec<AuditEvent> {
        let events = self.events.lock();
        events.iter().rev().take(count).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        events.push(event);
        if events.len() > self.capacity {
            let overflow = events.len() - self.capacity;
            events.drain(0..overflow);
        }
    }
}
