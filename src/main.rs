use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod db;
mod identity;
mod operations;

use commands::{ConfigCommand, HlcCommand, QueueCommand, SyncCommand, SyncContext};
use config::Config;

#[derive(Parser)]
#[command(name = "driftsync")]
#[command(version)]
#[command(about = "Offline-first sync client", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record and manage offline operations
    Queue(QueueCommand),

    /// Push queued operations to the server
    Sync(SyncCommand),

    /// Hybrid logical clock utilities
    Hlc(HlcCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "driftsync=info,driftsync_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Queue(cmd)) => {
            let context = SyncContext::open(&config).await?;
            cmd.run(&context.queue).await?;
        }
        Some(Commands::Sync(cmd)) => {
            let context = SyncContext::open(&config).await?;
            cmd.run(&context, &config).await?;
        }
        Some(Commands::Hlc(cmd)) => {
            cmd.run(&config)?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
