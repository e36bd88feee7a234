use anyhow::Result;

use epitrack_core::storage::{ArticleRepository, Database};

pub async fn run(db: &Database) -> Result<()> {
    let report = ArticleRepository::new(db).diagnostics().await?;

    println!("Articles:            {}", report.total);
    println!("  with keywords:     {}", report.with_keywords);
    println!("  with confidence:   {}", report.with_confidence);
    println!("  fully processed:   {}", report.fully_processed);
    println!("  unprocessed:       {}", report.unprocessed);
    println!("Duplicate links:     {}", report.duplicate_links);
    println!("Missing links:       {}", report.null_links);

    match (report.earliest_fetch, report.latest_fetch) {
        (Some(earliest), Some(latest)) => {
            println!(
                "Fetched between:     {} and {} ({} distinct days)",
                earliest.format("%Y-%m-%d %H:%M"),
                latest.format("%Y-%m-%d %H:%M"),
                report.distinct_fetch_dates
            );
        }
        _ => println!("Fetched between:     -"),
    }

    if report.recent.is_empty() {
        return Ok(());
    }

    println!("\nMost recent articles:\n");
    for article in &report.recent {
        let title = if article.title.chars().count() > 60 {
            format!("{}...", article.title.chars().take(57).collect::<String>())
        } else {
            article.title.clone()
        };
        println!(
            "  [{}] {} ({})",
            article.fetched_at.format("%Y-%m-%d %H:%M"),
            title,
            article.status
        );
        if let Some(link) = &article.link {
            println!("    {}", link);
        }
    }

    Ok(())
}
