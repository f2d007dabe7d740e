//! trilink command-line client.
//!
//! A linked-device companion for a multi-device E2E chat account: `link`
//! joins an existing mobile account through a QR rendezvous, `run` keeps
//! the mediator connection alive, `send` delivers a one-shot message.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use trilink_core::config::Config;

mod commands;

/// trilink - linked-device client for an E2E chat account
#[derive(Parser)]
#[command(name = "trilink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file path (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory override
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link this device to an existing account via QR rendezvous
    Link,

    /// Run the linked device: connect, reflect, and serve as leader
    Run,

    /// Send a text message (waits for leadership first)
    Send {
        /// Recipient identity (8 characters)
        recipient: String,

        /// Message text
        message: String,
    },

    /// Show the linked identity and cached directory counts
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Commands::Link => commands::link(&config).await,
        Commands::Run => commands::run(config).await,
        Commands::Send { recipient, message } => commands::send(config, &recipient, &message).await,
        Commands::Status => commands::status(&config),
    }
}
