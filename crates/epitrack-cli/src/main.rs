use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use epitrack_core::{storage::Database, AppConfig};

mod commands;

#[derive(Parser)]
#[command(name = "epitrack")]
#[command(author, version, about = "Scheduled news ingestion and outbreak analytics")]
struct Cli {
    /// Path to config file (defaults to ~/.config/epitrack/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Background daemon running ingestion on the configured schedule
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Run ingestion once in the foreground
    Ingest,
    /// Ask the running daemon to start an ingestion run now
    Trigger,
    /// Show aggregate statistics
    Stats {
        /// Also write the snapshot file
        #[arg(short, long)]
        export: bool,
        /// Snapshot file to write (implies --export)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recently mentioned topics
    Topics {
        /// Maximum number of topics
        #[arg(short = 'n', long)]
        limit: Option<u32>,
        /// Print topics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import articles from a JSON array file
    Import {
        file: PathBuf,
    },
    /// Report data quality of the article store
    Diagnose,
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the background daemon
    Start,
    /// Stop the background daemon
    Stop,
    /// Check daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    let config = Arc::new(config);

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Daemon { action } => match action {
            DaemonAction::Start => commands::daemon::start(config).await,
            DaemonAction::Stop => commands::daemon::stop().await,
            DaemonAction::Status => commands::daemon::status(&config).await,
        },
        Commands::Ingest => commands::ingest::run(&config).await,
        Commands::Trigger => commands::trigger::run(&config).await,
        Commands::Stats { export, output, json } => {
            let db = Arc::new(Database::new(&config).await?);
            commands::stats::run(db, &config, export, output, json).await
        }
        Commands::Topics { limit, json } => {
            let db = Arc::new(Database::new(&config).await?);
            commands::topics::run(db, &config, limit, json).await
        }
        Commands::Import { file } => {
            let db = Database::new(&config).await?;
            commands::import::run(&db, &file).await
        }
        Commands::Diagnose => {
            let db = Database::new(&config).await?;
            commands::diagnose::run(&db).await
        }
    }
}
