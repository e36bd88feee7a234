mod article_repo;
mod database;
mod models;
pub mod retry;

pub use article_repo::ArticleRepository;
pub use database::Database;
pub use models::{ArticleStatus, ArticleTopics, MetricCounts, NewArticle, StoreDiagnostics};

use crate::Result;

/// Read capability the aggregation layer needs from the article store
#[async_trait::async_trait]
pub trait ArticleStore: Send + Sync {
    /// Article count plus distinct keywords, diseases and countries, all taken
    /// from one point-in-time read
    async fn metric_counts(&self) -> Result<MetricCounts>;

    /// Up to `window` most recently fetched articles with a non-empty
    /// breakdown object, newest first
    async fn recent_topics(&self, window: u32) -> Result<Vec<ArticleTopics>>;
}

#[async_trait::async_trait]
impl ArticleStore for Database {
    async fn metric_counts(&self) -> Result<MetricCounts> {
        ArticleRepository::new(self).metric_counts().await
    }

    async fn recent_topics(&self, window: u32) -> Result<Vec<ArticleTopics>> {
        ArticleRepository::new(self).recent_topics(window).await
    }
}
