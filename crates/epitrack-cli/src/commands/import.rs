use std::path::Path;

use anyhow::{Context, Result};

use epitrack_core::storage::{ArticleRepository, Database, NewArticle};

/// Load a JSON array of articles; rows whose id already exists are left alone
pub async fn run(db: &Database, path: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let articles: Vec<NewArticle> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of articles", path.display()))?;

    if articles.is_empty() {
        println!("No articles found in {}", path.display());
        return Ok(());
    }

    let inserted = ArticleRepository::new(db).insert_many(&articles).await?;
    let skipped = articles.len() - inserted as usize;

    println!("Imported {} articles ({} already present)", inserted, skipped);
    Ok(())
}
