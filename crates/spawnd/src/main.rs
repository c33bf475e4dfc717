//! spawnd — the Spawnpoint daemon binary.
//!
//! # Usage
//!
//! ```text
//! spawnd run --config config.yml
//! spawnd decommission --config config.yml
//! ```
//!
//! The concrete message-bus client is an external collaborator; this
//! binary wires the in-process transport. A deployment substitutes its own
//! `BusTransport` implementation behind the same adapter.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use spawnpoint_backend::DockerCli;
use spawnpoint_bus::{BusAdapter, MemoryTransport};
use spawnpoint_core::TopicSpace;
use spawnpoint_daemon::{Daemon, DaemonConfig};

#[derive(Parser)]
#[command(name = "spawnd", about = "Spawnpoint daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the spawnpoint daemon.
    Run {
        /// Daemon configuration file.
        #[arg(long, short, default_value = "config.yml")]
        config: PathBuf,
    },

    /// Decommission a spawnpoint daemon, clearing its retained heartbeat.
    Decommission {
        /// Daemon configuration file.
        #[arg(long, short, default_value = "config.yml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,spawnd=debug,spawnpoint=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Decommission { config } => decommission(config).await,
    }
}

async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let daemon = build_daemon(&config_path)?;

    let token = daemon.token().clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        token.cancel();
    });

    daemon.run().await?;
    info!("spawnd stopped");
    Ok(())
}

async fn decommission(config_path: PathBuf) -> anyhow::Result<()> {
    let daemon = build_daemon(&config_path)?;
    daemon.decommission().await?;
    Ok(())
}

fn build_daemon(config_path: &PathBuf) -> anyhow::Result<Daemon> {
    let config = DaemonConfig::from_file(config_path)?;
    let topics = TopicSpace::new(config.path.clone());
    let bus = BusAdapter::new(Arc::new(MemoryTransport::new()), topics);
    let backend = Arc::new(DockerCli::new());
    Ok(Daemon::new(config, bus, backend)?)
}
