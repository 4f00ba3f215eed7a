//! Farm device agent - Main Entry Point
//!
//! Loads the configuration, wires the MQTT transport and the device's
//! hardware into the agent, then idles until SIGINT or SIGTERM.

use clap::{Parser, Subcommand};
use farm_agent::agent::FarmAgent;
use farm_agent::config::AgentConfig;
use farm_agent::hardware::HardwareSet;
use farm_agent::observability::init_default_logging;
use farm_agent::protocol::TopicSet;
use farm_agent::transport::mqtt::MqttClient;
use farm_agent::transport::ConnectionState;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Field agent for a smart-farm device
#[derive(Parser)]
#[command(name = "farm-agent")]
#[command(about = "Publishes farm telemetry and executes actuator commands over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "FARM_AGENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting farm agent v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_agent(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(AgentConfig::load_from_file(path)?);
    }

    for path_str in ["farm-agent.toml", "config/farm-agent.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(AgentConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create farm-agent.toml".into())
}

async fn run_agent(config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Agent starting with device ID: {}", config.device.id);

    let topics = TopicSet::for_device(&config.device.topic_root, &config.device.id);
    let transport = MqttClient::new(&config.device.id, topics, config.mqtt.clone())?;
    let connection = transport.subscribe_state();
    let hardware = HardwareSet::simulated(&config.camera);

    let mut agent = FarmAgent::new(config, transport, hardware);
    agent.start().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Agent is running");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = wait_for_permanent_disconnect(connection) => {
            error!("MQTT connection permanently lost, shutting down agent...");
        }
    }

    match agent.shutdown().await {
        Some(report) if !report.is_clean() => {
            warn!(?report, "Shutdown finished with errors");
        }
        _ => {}
    }
    Ok(())
}

fn handle_config_command(
    config: &AgentConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

/// Resolves once reconnection has given up for good
async fn wait_for_permanent_disconnect(mut state: watch::Receiver<ConnectionState>) {
    loop {
        if state.borrow_and_update().is_permanent_failure() {
            return;
        }
        if state.changed().await.is_err() {
            // Sender gone: the client was dropped, nothing left to watch
            std::future::pending::<()>().await;
        }
    }
}
