use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Source, SourceDbRow};

impl Database {
    // ========================================================================
    // Source Operations
    // ========================================================================

    /// Subscribe to a feed URL, returning the source id.
    ///
    /// Idempotent: subscribing to an existing link returns the existing id.
    /// The title starts out as the link and is replaced by the feed's own
    /// title on the first changed poll.
    pub async fn subscribe(&self, link: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO sources (link, title) VALUES (?, ?)
            ON CONFLICT(link) DO UPDATE SET link = excluded.link
            RETURNING id
        "#,
        )
        .bind(link)
        .bind(link)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Bulk-subscribe the configured URL list.
    /// Batches in chunks of 100 to stay under SQLite's parameter limit.
    pub async fn sync_subscriptions(&self, links: &[String]) -> Result<()> {
        if links.is_empty() {
            return Ok(());
        }

        const BATCH_SIZE: usize = 100;
        let mut tx = self.pool.begin().await?;

        for chunk in links.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("INSERT INTO sources (link, title) ");

            builder.push_values(chunk, |mut b, link| {
                b.push_bind(link).push_bind(link);
            });

            builder.push(" ON CONFLICT(link) DO NOTHING");

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Remove a source and (via cascade) all of its articles.
    /// Returns whether a source was removed.
    pub async fn unsubscribe(&self, link: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sources WHERE link = ?")
            .bind(link)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All sources ordered by title.
    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query_as::<_, SourceDbRow>(
            r#"
            SELECT id, link, title, fingerprint, poll_timeout_secs, last_polled
            FROM sources
            ORDER BY title COLLATE NOCASE, link
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SourceDbRow::into_source).collect())
    }

    pub async fn get_source(&self, link: &str) -> Result<Option<Source>> {
        let row = sqlx::query_as::<_, SourceDbRow>(
            r#"
            SELECT id, link, title, fingerprint, poll_timeout_secs, last_polled
            FROM sources
            WHERE link = ?
        "#,
        )
        .bind(link)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SourceDbRow::into_source))
    }

    /// Record a changed feed document: new title and fingerprint.
    pub async fn record_source_change(
        &self,
        source_id: i64,
        title: &str,
        fingerprint: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE sources SET title = ?, fingerprint = ? WHERE id = ?")
            .bind(title)
            .bind(fingerprint)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist the adaptive polling interval after a poll.
    pub async fn set_poll_timeout(&self, link: &str, timeout_secs: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE sources SET poll_timeout_secs = ?, last_polled = ? WHERE link = ?")
            .bind(timeout_secs)
            .bind(now)
            .bind(link)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let db = test_db().await;
        let id1 = db.subscribe("https://example.com/rss").await.unwrap();
        let id2 = db.subscribe("https://example.com/rss").await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(db.list_sources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_new_source_title_defaults_to_link() {
        let db = test_db().await;
        db.subscribe("https://example.com/rss").await.unwrap();
        let source = db.get_source("https://example.com/rss").await.unwrap().unwrap();
        assert_eq!(&*source.title, "https://example.com/rss");
        assert!(source.fingerprint.is_none());
        assert!(source.poll_timeout_secs.is_none());
    }

    #[tokio::test]
    async fn test_sync_subscriptions_skips_existing() {
        let db = test_db().await;
        let id = db.subscribe("https://a.example.com/rss").await.unwrap();
        db.record_source_change(id, "Feed A", "abc").await.unwrap();

        db.sync_subscriptions(&[
            "https://a.example.com/rss".to_string(),
            "https://b.example.com/rss".to_string(),
        ])
        .await
        .unwrap();

        let sources = db.list_sources().await.unwrap();
        assert_eq!(sources.len(), 2);
        let a = db.get_source("https://a.example.com/rss").await.unwrap().unwrap();
        assert_eq!(&*a.title, "Feed A", "existing title must be preserved");
        assert_eq!(a.fingerprint.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let db = test_db().await;
        db.subscribe("https://example.com/rss").await.unwrap();
        assert!(db.unsubscribe("https://example.com/rss").await.unwrap());
        assert!(!db.unsubscribe("https://example.com/rss").await.unwrap());
        assert!(db.list_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_poll_timeout() {
        let db = test_db().await;
        db.subscribe("https://example.com/rss").await.unwrap();
        db.set_poll_timeout("https://example.com/rss", 64).await.unwrap();
        let source = db.get_source("https://example.com/rss").await.unwrap().unwrap();
        assert_eq!(source.poll_timeout_secs, Some(64));
        assert!(source.last_polled.is_some());
    }
}
