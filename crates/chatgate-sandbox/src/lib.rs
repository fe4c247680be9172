//! Subprocess spawning, timeout/kill enforcement, and per-invocation
//! workspace directories — the low-level plumbing `chatgate-agents`' drivers
//! shell out through (spec §4.4, §5).

pub mod process;
pub mod workspace;

pub use process::{spawn_with_timeout, terminate, ExecOutcome};
pub use workspace::Workspace;
