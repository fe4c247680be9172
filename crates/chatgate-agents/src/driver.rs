//! §4.4: the closed capability set every agent implementation realizes.
//! Polymorphism here is a closed trait over two concrete drivers
//! (`Arc<dyn AgentDriver>` held by name in the orchestrator), not
//! inheritance or duck typing — §9 REDESIGN FLAGS.

use async_trait::async_trait;
use chatgate_core::{AgentRequest, CompletionResult, ModelInfo};
use tokio_util::sync::CancellationToken;

/// Driver-level error kinds (§4.4, §7). `Cancelled` is distinguished from
/// `AgentFailure`/`Timeout` because it is breaker-neutral (§4.5).
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("agent process failed: {0}")]
    AgentFailure(String),

    #[error("agent invocation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("cancelled")]
    Cancelled,
}

pub type DriverResult<T> = Result<T, DriverError>;

/// One chunk forwarded out of [`AgentDriver::stream`], before the
/// orchestrator's ordered, bounded forwarding takes over (§4.3 streaming
/// plumbing). A driver-level chunk carries no channel backpressure itself —
/// that's the orchestrator's bounded-channel job (§5).
pub use chatgate_core::StreamChunk;

#[async_trait]
pub trait AgentDriver: Send + Sync {
    /// Stable short name used in breaker naming, audit, and telemetry.
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
    ) -> DriverResult<CompletionResult>;

    /// Chunks are forwarded to `sink` strictly in emission order (§4.4
    /// public guarantee), realizing the "finite lazy sequence" of §3 as a
    /// bounded channel rather than a materialized collection; the
    /// orchestrator owns the consumer end and applies its own backpressure
    /// and cancellation policy on top (§5).
    async fn stream(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
        sink: tokio::sync::mpsc::Sender<StreamChunk>,
    ) -> DriverResult<()>;

    /// §4.4: stat + executable bit, optionally a cheap `--version` probe.
    /// Must return within ~5s.
    async fn is_healthy(&self) -> bool;

    /// §4.4: static per-driver list.
    fn available_models(&self) -> Vec<ModelInfo>;
}
