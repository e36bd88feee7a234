//! Aggregate article statistics.
//!
//! The same computation backs both publication paths: a fresh snapshot per
//! request, and a JSON file exported on demand or after ingestion.

mod format;

pub use format::format_count;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{ArticleStore, MetricCounts};
use crate::Result;

/// Display strings for the four counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsDisplay {
    pub articles_processed: String,
    pub keywords_extracted: String,
    pub diseases_tracked: String,
    pub countries_covered: String,
}

/// Point-in-time aggregate metrics over the article store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub articles_processed: u64,
    pub keywords_extracted: u64,
    pub diseases_tracked: u64,
    pub countries_covered: u64,
    /// When the snapshot was computed, not when the data changed
    pub last_updated: DateTime<Utc>,
    pub display: StatsDisplay,
}

impl StatsSnapshot {
    /// Build a snapshot; display strings are always derived from the counts
    pub fn from_counts(counts: MetricCounts, last_updated: DateTime<Utc>) -> Self {
        Self {
            articles_processed: counts.articles,
            keywords_extracted: counts.keywords,
            diseases_tracked: counts.diseases,
            countries_covered: counts.countries,
            last_updated,
            display: StatsDisplay {
                articles_processed: format_count(counts.articles),
                keywords_extracted: format_count(counts.keywords),
                diseases_tracked: format_count(counts.diseases),
                countries_covered: format_count(counts.countries),
            },
        }
    }
}

/// Computes and publishes stats snapshots
#[derive(Clone)]
pub struct StatsAggregator {
    store: Arc<dyn ArticleStore>,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn ArticleStore>) -> Self {
        Self { store }
    }

    /// Compute a fresh snapshot. Any failed read fails the whole snapshot.
    pub async fn compute_snapshot(&self) -> Result<StatsSnapshot> {
        let counts = self.store.metric_counts().await?;
        Ok(StatsSnapshot::from_counts(counts, Utc::now()))
    }

    /// Compute a snapshot and write it to `path`
    pub async fn export_snapshot(&self, path: &Path) -> Result<StatsSnapshot> {
        let snapshot = self.compute_snapshot().await?;
        write_snapshot(&snapshot, path).await?;
        tracing::info!(
            articles = snapshot.articles_processed,
            keywords = snapshot.keywords_extracted,
            diseases = snapshot.diseases_tracked,
            countries = snapshot.countries_covered,
            "Wrote stats snapshot to {}",
            path.display()
        );
        Ok(snapshot)
    }
}

/// Write a snapshot as pretty JSON. The file is replaced atomically so readers
/// never see a half-written snapshot.
pub async fn write_snapshot(snapshot: &StatsSnapshot, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let json = serde_json::to_string_pretty(snapshot)?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}
