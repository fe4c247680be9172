//! §4.3, §4.4, §4.5: the agent abstraction, its two concrete CLI-backed
//! drivers, the circuit breaker that gates them, and the orchestrator that
//! composes selection, breaker-gated execution and fallback.

pub mod circuit_breaker;
pub mod cli_driver;
pub mod driver;
pub mod drivers;
pub mod orchestrator;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use cli_driver::{CliAgentConfig, CliAgentDriver};
pub use driver::{AgentDriver, DriverError, DriverResult};
pub use drivers::{agent_a, agent_b};
pub use orchestrator::{CompletionOutcome, Orchestrator};
