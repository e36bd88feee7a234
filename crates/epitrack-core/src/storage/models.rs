use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An article as handed to the store by the ingestion side.
///
/// `keywords` and `disease_breakdown` are kept as raw JSON: the aggregation
/// queries decide per row whether the value has the expected shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewArticle {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub link: Option<String>,
    /// Defaults to the insertion time
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub keywords: Option<serde_json::Value>,
    #[serde(default)]
    pub disease_breakdown: Option<serde_json::Value>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
}

impl NewArticle {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            link: None,
            fetched_at: None,
            keywords: None,
            disease_breakdown: None,
            country: None,
            confidence_score: None,
        }
    }
}

/// The four aggregate counts, read together from one store snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricCounts {
    pub articles: u64,
    pub keywords: u64,
    pub diseases: u64,
    pub countries: u64,
}

/// Topic labels of one article, in the order they are stored in its breakdown
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleTopics {
    pub article_id: String,
    pub fetched_at: DateTime<Utc>,
    pub topics: Vec<String>,
}

/// Data-quality report over the whole article table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDiagnostics {
    pub total: u64,
    pub with_keywords: u64,
    pub with_confidence: u64,
    pub fully_processed: u64,
    pub unprocessed: u64,
    /// Number of distinct links stored more than once
    pub duplicate_links: u64,
    pub null_links: u64,
    pub earliest_fetch: Option<DateTime<Utc>>,
    pub latest_fetch: Option<DateTime<Utc>>,
    pub distinct_fetch_dates: u64,
    pub recent: Vec<ArticleStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleStatus {
    pub id: String,
    pub title: String,
    pub link: Option<String>,
    pub fetched_at: DateTime<Utc>,
    /// "No keywords", "No confidence" or "Processed"
    pub status: String,
}
