//! chatgate binary: `serve` starts the HTTP gateway, `check` runs the
//! startup self-test described by §6.3's exit codes without binding a
//! listener, `models` prints `AvailableModels` for whichever drivers are
//! configured.

use chatgate_agents::{agent_a, agent_b, AgentDriver, Orchestrator};
use chatgate_gateway::{GatewayConfig, GatewayState};
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about = "chatgate — multi-tenant chat completions gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway and block until shutdown.
    Serve,
    /// Validate configuration and driver availability, then exit.
    Check,
    /// Print the union of models reported by configured drivers as JSON.
    Models,
}

/// §6.3: 0 normal shutdown, 1 configuration invalid at startup, 2 no driver
/// available at startup.
const EXIT_CONFIG_INVALID: i32 = 1;
const EXIT_NO_DRIVER: i32 = 2;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn build_orchestrator(config: &GatewayConfig) -> Orchestrator {
    let driver_a: Option<Arc<dyn AgentDriver>> = config
        .agent_a_binary
        .as_ref()
        .map(|bin| Arc::new(agent_a(bin.clone(), config.agent_timeout)) as Arc<dyn AgentDriver>);
    let driver_b: Option<Arc<dyn AgentDriver>> = config
        .agent_b_binary
        .as_ref()
        .map(|bin| Arc::new(agent_b(bin.clone(), config.agent_timeout)) as Arc<dyn AgentDriver>);

    Orchestrator::new(driver_a, driver_b, config.primary_is_a, config.fallback_enabled, config.max_tokens)
}

fn load_config() -> GatewayConfig {
    match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration invalid: {e}");
            std::process::exit(EXIT_CONFIG_INVALID);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let config = load_config();
            if !config.has_any_agent_binary() {
                eprintln!("no agent driver binary configured (AGENT_A_BINARY / AGENT_B_BINARY)");
                std::process::exit(EXIT_NO_DRIVER);
            }
            let orchestrator = build_orchestrator(&config);
            let state = Arc::new(GatewayState::new(config, orchestrator));
            chatgate_gateway::serve(state).await?;
        }
        Commands::Check => {
            let config = load_config();
            if !config.has_any_agent_binary() {
                eprintln!("no agent driver binary configured (AGENT_A_BINARY / AGENT_B_BINARY)");
                std::process::exit(EXIT_NO_DRIVER);
            }
            let orchestrator = build_orchestrator(&config);
            if !orchestrator.has_any_driver() {
                eprintln!("configured driver binaries failed to register");
                std::process::exit(EXIT_NO_DRIVER);
            }
            let models = orchestrator.available_models().await;
            println!("ok: {} model(s) available", models.len());
        }
        Commands::Models => {
            let config = load_config();
            let orchestrator = build_orchestrator(&config);
            let models = orchestrator.available_models().await;
            println!("{}", serde_json::to_string_pretty(&models)?);
        }
    }

    Ok(())
}
