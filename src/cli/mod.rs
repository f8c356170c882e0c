//! CLI parser and dispatch.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{DataDir, Settings};

#[derive(Parser)]
#[command(name = "hopper")]
#[command(about = "Watched-inbox document processing pipeline")]
#[command(version)]
pub struct Cli {
    /// Config file (default: hopper.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overriding the configured one
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the inbox and process queued documents until interrupted
    Run {
        /// Override the configured worker count
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Show queue and breaker status
    Status,

    /// Enqueue files directly, bypassing the inbox stability wait
    Enqueue {
        /// Files to enqueue
        files: Vec<PathBuf>,
        /// Priority (high, normal, low); defaults to filename markers
        #[arg(short, long)]
        priority: Option<String>,
    },

    /// Reset a dead item to pending with a fresh retry budget
    Requeue {
        /// Item id as shown by status
        item_id: i64,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = DataDir(data_dir);
    }

    match cli.command {
        Commands::Run { workers } => commands::run::cmd_run(settings, workers).await,
        Commands::Status => commands::status::cmd_status(&settings),
        Commands::Enqueue { files, priority } => {
            commands::enqueue::cmd_enqueue(&settings, &files, priority.as_deref())
        }
        Commands::Requeue { item_id } => commands::requeue::cmd_requeue(&settings, item_id),
    }
}
