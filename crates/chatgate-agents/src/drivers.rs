//! The two concrete agent drivers (§2: "AgentDriver (2 implementations: A,
//! B)"). Both are [`CliAgentDriver`] instances differing only in binary
//! path, name and model catalog — the closed capability set is realized
//! once, not duplicated per agent.

use crate::cli_driver::{CliAgentConfig, CliAgentDriver};
use chatgate_core::ModelInfo;
use std::path::PathBuf;
use std::time::Duration;

fn model(id: &str, provider: &str, context_window: u32, capabilities: &[&str]) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        provider: provider.to_string(),
        context_window,
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
    }
}

pub fn agent_a(binary: PathBuf, invocation_timeout: Duration) -> CliAgentDriver {
    CliAgentDriver::new(
        CliAgentConfig {
            name: "agent-a",
            invocation_timeout,
            models: vec![
                model("gemini-2.5-pro", "agent-a", 1_000_000, &["chat", "tools", "vision"]),
                model("gemini-2.5-flash", "agent-a", 1_000_000, &["chat", "tools"]),
            ],
        },
        binary,
    )
}

pub fn agent_b(binary: PathBuf, invocation_timeout: Duration) -> CliAgentDriver {
    CliAgentDriver::new(
        CliAgentConfig {
            name: "agent-b",
            invocation_timeout,
            models: vec![
                model("gpt-4-turbo", "agent-b", 128_000, &["chat", "tools"]),
                model("gpt-4o-mini", "agent-b", 128_000, &["chat"]),
            ],
        },
        binary,
    )
}
