//! Domain types and collaborators shared by every layer of chatgate.
//!
//! This crate has no dependency on any other workspace crate — it is the
//! leaf of the dependency graph described in SPEC_FULL.md §10.

pub mod audit;
pub mod chat;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod tokens;

pub use audit::{AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use chat::{
    AgentRequest, ChatRequest, ChatResponse, Choice, CompletionResult, FinishReason, Message,
    ModelInfo, Role, StreamChunk, Usage,
};
pub use error::{ErrorCode, GatewayError, Result};
pub use identity::{Identity, Tier};
pub use metrics::{InMemoryMetrics, MetricsRegistry, NoopMetrics};

pub use uuid::Uuid;
