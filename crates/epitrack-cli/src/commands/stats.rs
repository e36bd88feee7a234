use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;

use epitrack_core::{storage::Database, AppConfig, StatsAggregator};

pub async fn run(
    db: Arc<Database>,
    config: &AppConfig,
    export: bool,
    output: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let aggregator = StatsAggregator::new(db);

    let snapshot = if export || output.is_some() {
        let path = output.unwrap_or_else(|| config.snapshot_path());
        let snapshot = aggregator.export_snapshot(&path).await?;
        if !json {
            println!("Snapshot written to {}\n", path.display());
        }
        snapshot
    } else {
        aggregator.compute_snapshot().await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let display = &snapshot.display;
    println!("Articles processed: {:>10}", display.articles_processed);
    println!("Keywords extracted: {:>10}", display.keywords_extracted);
    println!("Diseases tracked:   {:>10}", display.diseases_tracked);
    println!("Countries covered:  {:>10}", display.countries_covered);
    println!(
        "\nLast updated: {}",
        snapshot.last_updated.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );

    Ok(())
}
