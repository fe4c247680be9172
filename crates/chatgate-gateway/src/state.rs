//! Process-wide shared state (§3: AuditSink/MetricsRegistry are process-wide
//! and shared; each CircuitBreaker is owned by the Orchestrator). Threaded
//! through axum handlers via `State<Arc<GatewayState>>`.

use crate::config::GatewayConfig;
use crate::jwks::JwksCache;
use chatgate_agents::Orchestrator;
use chatgate_core::{AuditEvent, AuditOutcome, AuditSink, Identity, InMemoryAuditSink, InMemoryMetrics, MetricsRegistry, NoopMetrics};
use std::sync::Arc;

pub struct GatewayState {
    pub config: GatewayConfig,
    pub orchestrator: Orchestrator,
    pub jwks: JwksCache,
    pub audit_sink: Arc<dyn AuditSink>,
    pub metrics: Arc<dyn MetricsRegistry>,
}

const AUDIT_CAPACITY: usize = 10_000;

impl GatewayState {
    pub fn new(config: GatewayConfig, orchestrator: Orchestrator) -> Self {
        let jwks = JwksCache::new(config.jwks_url.clone());
        let audit_sink: Arc<dyn AuditSink> = InMemoryAuditSink::new(AUDIT_CAPACITY);
        let metrics: Arc<dyn MetricsRegistry> = if config.metrics_enabled {
            InMemoryMetrics::new()
        } else {
            Arc::new(NoopMetrics)
        };
        Self {
            config,
            orchestrator,
            jwks,
            audit_sink,
            metrics,
        }
    }

    /// §4.1 step 6 / §5 ("audit events for a single request are serialized
    /// with respect to that request"). A no-op write when `AUDIT_ENABLED=false`.
    pub fn audit(&self, identity: &Identity, route: &str, method: &str, outcome: AuditOutcome, reason: Option<&str>) {
        if !self.config.audit_enabled {
            return;
        }
        self.audit_sink.record(AuditEvent {
            ts: chrono::Utc::now(),
            user_id: identity.user_id.clone(),
            org_id: identity.org_id.clone(),
            route: route.to_string(),
            method: method.to_string(),
            tier: format!("{:?}", identity.tier).to_lowercase(),
            outcome,
            reason: reason.map(str::to_string),
        });
    }
}
