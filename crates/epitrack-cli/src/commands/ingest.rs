use std::sync::Arc;

use anyhow::{bail, Result};

use epitrack_core::{
    ingest::{CommandInvoker, IngestOutcome, IngestionInvoker},
    ipc::is_daemon_running,
    storage::Database,
    AppConfig, StatsAggregator,
};

/// Run one ingestion pass in the foreground
pub async fn run(config: &AppConfig) -> Result<()> {
    if is_daemon_running(&config.socket_path()).await {
        bail!("The daemon is running; use 'epitrack trigger' so runs do not overlap");
    }

    let invoker = CommandInvoker::from_config(&config.ingest);
    println!("Running: {}", invoker.describe());

    match invoker.invoke().await {
        IngestOutcome::Success(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            println!("Ingestion finished.");
        }
        IngestOutcome::StreamError(message) => {
            eprintln!("{}", message);
            println!("Ingestion finished with error output.");
            return Ok(());
        }
        IngestOutcome::ProcessError(message) => bail!("Ingestion failed: {}", message),
    }

    if config.stats.export_after_ingest {
        let db = Database::new(config).await?;
        let path = config.snapshot_path();
        StatsAggregator::new(Arc::new(db)).export_snapshot(&path).await?;
        println!("Stats snapshot written to {}", path.display());
    }

    Ok(())
}
