use std::sync::Arc;

use anyhow::Result;

use epitrack_core::{storage::Database, AppConfig, RecentTopicsDeriver};

pub async fn run(db: Arc<Database>, config: &AppConfig, limit: Option<u32>, json: bool) -> Result<()> {
    let limit = limit.unwrap_or(config.stats.recent_topics_limit);
    let topics = RecentTopicsDeriver::new(db).derive(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&topics)?);
        return Ok(());
    }

    if topics.is_empty() {
        println!("No recent topics.");
        return Ok(());
    }

    println!("Recent topics ({}):\n", topics.len());
    for topic in &topics {
        println!("  {:<32} {}", topic.topic, topic.time_ago);
    }

    Ok(())
}
