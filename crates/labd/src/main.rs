//! labd: the labgrid daemon.
//!
//! Single binary that assembles all labgrid subsystems:
//! - State store (redb)
//! - Compute and storage provider
//! - Server lifecycle
//! - Auto-destroy and auto-remediate reconcilers, each supervised
//! - REST API
//!
//! # Usage
//!
//! ```text
//! labd standalone --config /etc/labgrid/labd.toml --port 8443 --data-dir /var/lib/labgrid
//! ```

mod standalone;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use labgrid_core::LabConfig;

#[derive(Parser)]
#[command(name = "labd", about = "labgrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run in standalone mode (single node, config-driven provider).
    Standalone {
        /// Path to labd.toml. Built-in defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides `[server] port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides `[server] data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,labd=debug,labgrid=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            config,
            port,
            data_dir,
        } => {
            let mut config = match config {
                Some(path) => LabConfig::from_file(&path)?,
                None => LabConfig::default(),
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            standalone::run_standalone(config).await
        }
    }
}
