//! Recently mentioned topics, deduplicated and labelled with their age.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::ArticleStore;
use crate::{Error, Result};

/// Articles fetched per requested topic, to absorb duplicate labels
const OVERFETCH_FACTOR: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentTopic {
    #[serde(rename = "query")]
    pub topic: String,
    #[serde(rename = "timeAgo")]
    pub time_ago: String,
    /// Fetch time of the article the topic was taken from
    pub timestamp: DateTime<Utc>,
}

/// Trim and title-case every whitespace-separated word
pub fn normalize_topic(label: &str) -> String {
    label
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// "2d ago", "3h ago", "5m ago" or "Just now". Timestamps in the future are
/// treated as "Just now".
pub fn relative_age(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let age = now - then;
    let hours = age.num_hours();
    let minutes = age.num_minutes();

    if hours >= 24 {
        format!("{}d ago", hours / 24)
    } else if hours > 0 {
        format!("{}h ago", hours)
    } else if minutes > 0 {
        format!("{}m ago", minutes)
    } else {
        "Just now".to_string()
    }
}

#[derive(Clone)]
pub struct RecentTopicsDeriver {
    store: Arc<dyn ArticleStore>,
}

impl RecentTopicsDeriver {
    pub fn new(store: Arc<dyn ArticleStore>) -> Self {
        Self { store }
    }

    /// Up to `limit` distinct topics, most recent first
    pub async fn derive(&self, limit: u32) -> Result<Vec<RecentTopic>> {
        self.derive_at(limit, Utc::now()).await
    }

    /// Same as `derive`, with ages measured from `now`
    pub async fn derive_at(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<RecentTopic>> {
        if limit == 0 {
            return Err(Error::InvalidArgument(
                "topic limit must be at least 1".to_string(),
            ));
        }

        let window = limit.saturating_mul(OVERFETCH_FACTOR);
        let articles = self.store.recent_topics(window).await?;

        let limit = limit as usize;
        let mut seen = HashSet::new();
        let mut topics = Vec::with_capacity(limit);

        'articles: for article in articles {
            for label in &article.topics {
                let topic = normalize_topic(label);
                if topic.is_empty() || !seen.insert(topic.to_lowercase()) {
                    continue;
                }

                topics.push(RecentTopic {
                    topic,
                    time_ago: relative_age(now, article.fetched_at),
                    timestamp: article.fetched_at,
                });

                if topics.len() >= limit {
                    break 'articles;
                }
            }
        }

        Ok(topics)
    }
}
