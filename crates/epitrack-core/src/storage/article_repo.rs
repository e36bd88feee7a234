use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};
use uuid::Uuid;

use super::retry::query_with_retry;
use super::{ArticleStatus, ArticleTopics, Database, MetricCounts, NewArticle, StoreDiagnostics};
use crate::Result;

/// Number of articles listed in the diagnostics report
const DIAGNOSTIC_RECENT_LIMIT: i64 = 20;

/// Repository for article reads and inserts
pub struct ArticleRepository<'a> {
    db: &'a Database,
}

#[derive(FromRow)]
struct TopicRow {
    article_id: String,
    fetched_at: DateTime<Utc>,
    topic: String,
}

#[derive(FromRow)]
struct StatusRow {
    id: String,
    title: String,
    link: Option<String>,
    fetched_at: DateTime<Utc>,
    status: String,
}

impl From<StatusRow> for ArticleStatus {
    fn from(row: StatusRow) -> Self {
        ArticleStatus {
            id: row.id,
            title: row.title,
            link: row.link,
            fetched_at: row.fetched_at,
            status: row.status,
        }
    }
}

impl<'a> ArticleRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert one article, returning false if its id already exists
    pub async fn insert(&self, article: &NewArticle) -> Result<bool> {
        Ok(self.insert_many(std::slice::from_ref(article)).await? > 0)
    }

    /// Insert articles in one transaction, returning the count of newly stored rows.
    /// Existing ids are left untouched.
    pub async fn insert_many(&self, articles: &[NewArticle]) -> Result<u32> {
        let now = Utc::now();
        let mut inserted = 0;
        let mut tx = self.db.pool().begin().await?;

        for article in articles {
            let id = article
                .id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let keywords = article.keywords.as_ref().map(|v| v.to_string());
            let breakdown = article.disease_breakdown.as_ref().map(|v| v.to_string());

            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO articles
                (id, title, link, fetched_at, keywords, disease_breakdown, country, confidence_score)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&article.title)
            .bind(&article.link)
            .bind(article.fetched_at.unwrap_or(now))
            .bind(&keywords)
            .bind(&breakdown)
            .bind(&article.country)
            .bind(article.confidence_score)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Read all four aggregate counts inside a single transaction
    pub async fn metric_counts(&self) -> Result<MetricCounts> {
        Ok(query_with_retry(|| self.read_metric_counts()).await?)
    }

    async fn read_metric_counts(&self) -> std::result::Result<MetricCounts, sqlx::Error> {
        let mut tx = self.db.pool().begin().await?;

        let articles: i64 = sqlx::query_scalar(COUNT_ARTICLES)
            .fetch_one(&mut *tx)
            .await?;
        let keywords: i64 = sqlx::query_scalar(COUNT_DISTINCT_KEYWORDS)
            .fetch_one(&mut *tx)
            .await?;
        let diseases: i64 = sqlx::query_scalar(COUNT_DISTINCT_DISEASES)
            .fetch_one(&mut *tx)
            .await?;
        let countries: i64 = sqlx::query_scalar(COUNT_DISTINCT_COUNTRIES)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(MetricCounts {
            articles: articles as u64,
            keywords: keywords as u64,
            diseases: diseases as u64,
            countries: countries as u64,
        })
    }

    /// Topic labels of the `window` most recently fetched articles that carry a
    /// non-empty breakdown object, newest first, keys in stored order
    pub async fn recent_topics(&self, window: u32) -> Result<Vec<ArticleTopics>> {
        let rows: Vec<TopicRow> = query_with_retry(|| {
            sqlx::query_as::<_, TopicRow>(RECENT_TOPICS)
                .bind(window as i64)
                .fetch_all(self.db.pool())
        })
        .await?;

        let mut grouped: Vec<ArticleTopics> = Vec::new();
        for row in rows {
            if let Some(last) = grouped
                .last_mut()
                .filter(|last| last.article_id == row.article_id)
            {
                last.topics.push(row.topic);
                continue;
            }
            grouped.push(ArticleTopics {
                article_id: row.article_id,
                fetched_at: row.fetched_at,
                topics: vec![row.topic],
            });
        }

        Ok(grouped)
    }

    /// Build the data-quality report
    pub async fn diagnostics(&self) -> Result<StoreDiagnostics> {
        Ok(query_with_retry(|| self.read_diagnostics()).await?)
    }

    /// Every figure is read inside one transaction
    async fn read_diagnostics(&self) -> std::result::Result<StoreDiagnostics, sqlx::Error> {
        let mut tx = self.db.pool().begin().await?;

        let total = count(&mut tx, COUNT_ARTICLES).await?;
        let with_keywords = count(
            &mut tx,
            "SELECT COUNT(*) FROM articles WHERE keywords IS NOT NULL",
        )
        .await?;
        let with_confidence = count(
            &mut tx,
            "SELECT COUNT(*) FROM articles WHERE confidence_score IS NOT NULL",
        )
        .await?;
        let fully_processed = count(
            &mut tx,
            "SELECT COUNT(*) FROM articles WHERE keywords IS NOT NULL AND confidence_score IS NOT NULL",
        )
        .await?;
        let unprocessed = count(
            &mut tx,
            "SELECT COUNT(*) FROM articles WHERE keywords IS NULL OR confidence_score IS NULL",
        )
        .await?;
        let duplicate_links = count(
            &mut tx,
            r#"
            SELECT COUNT(*) FROM (
                SELECT link FROM articles
                WHERE link IS NOT NULL
                GROUP BY link
                HAVING COUNT(*) > 1
            )
            "#,
        )
        .await?;
        let null_links = count(&mut tx, "SELECT COUNT(*) FROM articles WHERE link IS NULL").await?;

        let (earliest_fetch, latest_fetch, distinct_fetch_dates): (
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
            i64,
        ) = sqlx::query_as(
            r#"
            SELECT MIN(fetched_at), MAX(fetched_at), COUNT(DISTINCT DATE(fetched_at))
            FROM articles
            "#,
        )
        .fetch_one(&mut *tx)
        .await?;

        let recent: Vec<StatusRow> = sqlx::query_as(
            r#"
            SELECT id, title, link, fetched_at,
                   CASE
                       WHEN keywords IS NULL THEN 'No keywords'
                       WHEN confidence_score IS NULL THEN 'No confidence'
                       ELSE 'Processed'
                   END AS status
            FROM articles
            ORDER BY fetched_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(DIAGNOSTIC_RECENT_LIMIT)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(StoreDiagnostics {
            total,
            with_keywords,
            with_confidence,
            fully_processed,
            unprocessed,
            duplicate_links,
            null_links,
            earliest_fetch,
            latest_fetch,
            distinct_fetch_dates: distinct_fetch_dates as u64,
            recent: recent.into_iter().map(ArticleStatus::from).collect(),
        })
    }
}

const COUNT_ARTICLES: &str = "SELECT COUNT(*) FROM articles";

// json_type() raises on malformed JSON, so every JSON column is routed through
// a CASE that only hands well-formed values of the right type to json_each().
const COUNT_DISTINCT_KEYWORDS: &str = r#"
SELECT COUNT(DISTINCT k.value)
FROM articles AS a,
     json_each(
         CASE WHEN json_valid(a.keywords)
              THEN CASE json_type(a.keywords) WHEN 'array' THEN a.keywords ELSE '[]' END
              ELSE '[]'
         END
     ) AS k
"#;

const COUNT_DISTINCT_DISEASES: &str = r#"
SELECT COUNT(DISTINCT d.key)
FROM articles AS a,
     json_each(
         CASE WHEN json_valid(a.disease_breakdown)
              THEN CASE json_type(a.disease_breakdown) WHEN 'object' THEN a.disease_breakdown ELSE '{}' END
              ELSE '{}'
         END
     ) AS d
"#;

const COUNT_DISTINCT_COUNTRIES: &str = r#"
SELECT COUNT(DISTINCT country)
FROM articles
WHERE country IS NOT NULL
  AND TRIM(country, ' ' || char(9) || char(10) || char(11) || char(12) || char(13)) <> ''
"#;

// json_each.id increases in document order, which preserves the key order the
// ingester wrote.
const RECENT_TOPICS: &str = r#"
SELECT a.id AS article_id, a.fetched_at AS fetched_at, t.key AS topic
FROM (
    SELECT id, fetched_at, disease_breakdown
    FROM articles
    WHERE CASE WHEN json_valid(disease_breakdown)
               THEN json_type(disease_breakdown) = 'object'
                    AND EXISTS (SELECT 1 FROM json_each(disease_breakdown))
               ELSE 0
          END
    ORDER BY fetched_at DESC, id DESC
    LIMIT ?
) AS a,
json_each(a.disease_breakdown) AS t
ORDER BY a.fetched_at DESC, a.id DESC, t.id ASC
"#;

async fn count(conn: &mut SqliteConnection, sql: &str) -> std::result::Result<u64, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(sql).fetch_one(&mut *conn).await?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn article(id: &str, fetched_at: DateTime<Utc>) -> NewArticle {
        NewArticle {
            id: Some(id.to_string()),
            fetched_at: Some(fetched_at),
            ..NewArticle::new(format!("Article {}", id))
        }
    }

    #[tokio::test]
    async fn test_keyword_count_is_distinct_and_case_sensitive() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = ArticleRepository::new(&db);
        let now = Utc::now();

        let mut a = article("a", now);
        a.keywords = Some(json!(["fever", "cough"]));
        let mut b = article("b", now);
        b.keywords = Some(json!(["fever"]));
        let mut c = article("c", now);
        c.keywords = Some(json!([]));
        let d = article("d", now);
        repo.insert_many(&[a, b, c, d]).await.unwrap();

        let counts = repo.metric_counts().await.unwrap();
        assert_eq!(counts.articles, 4);
        assert_eq!(counts.keywords, 2);

        let mut e = article("e", now);
        e.keywords = Some(json!(["Fever"]));
        repo.insert(&e).await.unwrap();
        assert_eq!(repo.metric_counts().await.unwrap().keywords, 3);
    }

    #[tokio::test]
    async fn test_disease_count_ignores_non_objects() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = ArticleRepository::new(&db);
        let now = Utc::now();

        let mut a = article("a", now);
        a.disease_breakdown = Some(json!({"Malaria": 0.7, "Cholera": 0.3}));
        let mut b = article("b", now);
        b.disease_breakdown = Some(json!({"malaria": 1.0, "Cholera": 0.1}));
        let mut scalar = article("scalar", now);
        scalar.disease_breakdown = Some(json!(0));
        let mut array = article("array", now);
        array.disease_breakdown = Some(json!(["Measles"]));
        repo.insert_many(&[a, b, scalar, array]).await.unwrap();

        assert_eq!(repo.metric_counts().await.unwrap().diseases, 3);
    }

    #[tokio::test]
    async fn test_malformed_json_does_not_fail_counts() {
        let db = Database::new_in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO articles (id, title, fetched_at, keywords, disease_breakdown) VALUES ('x', 'x', ?, 'fever,', '{oops')",
        )
        .bind(Utc::now())
        .execute(db.pool())
        .await
        .unwrap();

        let counts = ArticleRepository::new(&db).metric_counts().await.unwrap();
        assert_eq!(counts.articles, 1);
        assert_eq!(counts.keywords, 0);
        assert_eq!(counts.diseases, 0);
    }

    #[tokio::test]
    async fn test_country_count_excludes_blank() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = ArticleRepository::new(&db);
        let now = Utc::now();

        let countries = [Some(""), Some("   "), Some("\t"), None, Some("Kenya"), Some("kenya"), Some("Kenya")];
        let articles: Vec<NewArticle> = countries
            .iter()
            .enumerate()
            .map(|(i, country)| {
                let mut a = article(&i.to_string(), now);
                a.country = country.map(str::to_string);
                a
            })
            .collect();
        repo.insert_many(&articles).await.unwrap();

        assert_eq!(repo.metric_counts().await.unwrap().countries, 2);
    }

    #[tokio::test]
    async fn test_insert_ignores_existing_id() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = ArticleRepository::new(&db);
        let now = Utc::now();

        assert!(repo.insert(&article("a", now)).await.unwrap());
        assert!(!repo.insert(&article("a", now)).await.unwrap());
        let inserted = repo
            .insert_many(&[article("a", now), article("b", now), NewArticle::new("no id")])
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(repo.metric_counts().await.unwrap().articles, 3);
    }

    #[tokio::test]
    async fn test_recent_topics_order_and_window() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = ArticleRepository::new(&db);
        let now = Utc::now();

        let mut old = article("old", now - Duration::hours(5));
        old.disease_breakdown = Some(json!({"Dengue": 0.2}));
        let mut newest = article("newest", now);
        newest.disease_breakdown = Some(json!({"zika": 0.4, "Cholera": 0.9, "avian flu": 0.1}));
        let mut empty = article("empty", now - Duration::minutes(1));
        empty.disease_breakdown = Some(json!({}));
        let mut scalar = article("scalar", now - Duration::minutes(2));
        scalar.disease_breakdown = Some(json!(0));
        let mut middle = article("middle", now - Duration::hours(1));
        middle.disease_breakdown = Some(json!({"Malaria": 1}));
        repo.insert_many(&[old, newest, empty, scalar, middle]).await.unwrap();

        let recent = repo.recent_topics(10).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|a| a.article_id.as_str()).collect();
        assert_eq!(ids, vec!["newest", "middle", "old"]);
        assert_eq!(recent[0].topics, vec!["zika", "Cholera", "avian flu"]);

        let window = repo.recent_topics(2).await.unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[1].article_id, "middle");
    }

    #[tokio::test]
    async fn test_diagnostics_reports_duplicates_and_status() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = ArticleRepository::new(&db);
        let now = Utc::now();

        let mut a = article("a", now - Duration::days(2));
        a.link = Some("https://example.org/outbreak".to_string());
        a.keywords = Some(json!(["fever"]));
        a.confidence_score = Some(0.8);
        let mut b = article("b", now - Duration::days(1));
        b.link = Some("https://example.org/outbreak".to_string());
        b.keywords = Some(json!(["cough"]));
        let c = article("c", now);
        repo.insert_many(&[a, b, c]).await.unwrap();

        let report = repo.diagnostics().await.unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.with_keywords, 2);
        assert_eq!(report.with_confidence, 1);
        assert_eq!(report.fully_processed, 1);
        assert_eq!(report.unprocessed, 2);
        assert_eq!(report.duplicate_links, 1);
        assert_eq!(report.null_links, 1);
        assert_eq!(report.distinct_fetch_dates, 3);
        assert!(report.earliest_fetch.is_some());

        let statuses: Vec<&str> = report.recent.iter().map(|r| r.status.as_str()).collect();
        assert_eq!(statuses, vec!["No keywords", "No confidence", "Processed"]);
    }

    #[tokio::test]
    async fn test_diagnostics_on_empty_store() {
        let db = Database::new_in_memory().await.unwrap();
        let report = ArticleRepository::new(&db).diagnostics().await.unwrap();

        assert_eq!(report.total, 0);
        assert_eq!(report.unprocessed, 0);
        assert_eq!(report.duplicate_links, 0);
        assert_eq!(report.distinct_fetch_dates, 0);
        assert!(report.earliest_fetch.is_none());
        assert!(report.latest_fetch.is_none());
        assert!(report.recent.is_empty());
    }

    #[tokio::test]
    async fn test_diagnostics_leaves_no_open_transaction() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = ArticleRepository::new(&db);

        repo.diagnostics().await.unwrap();
        // A writer right after the report must not be blocked by it
        assert!(repo.insert(&article("after", Utc::now())).await.unwrap());
        assert_eq!(repo.diagnostics().await.unwrap().total, 1);
    }
}
