use anyhow::Result;
use sqlx::{QueryBuilder, SqliteConnection};
use std::collections::HashMap;

use super::schema::Database;
use super::types::{
    is_unique_violation, Article, ArticleDbRow, Image, InsertOutcome, NewArticle, NewImage,
    RankCandidate,
};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of articles to return from any single query (OOM protection)
const MAX_ARTICLES: i64 = 2000;

/// Column list shared by every article SELECT. Joins `images` and `media` for filenames.
const ARTICLE_SELECT: &str = r#"
    SELECT a.id, a.source_id, a.link, a.title, a.content, a.date,
           i.filename AS image, m.filename AS media,
           a.times_read, a.skip_count, a.last_read
    FROM articles a
    LEFT JOIN images i ON i.id = a.image_id
    LEFT JOIN media m ON m.id = a.media_id
"#;

impl Database {
    // ========================================================================
    // Dedup
    // ========================================================================

    /// Whether an article with this canonical link is already stored.
    pub async fn article_exists(&self, link: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM articles WHERE link = ?")
            .bind(link)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    // ========================================================================
    // Article Insert
    // ========================================================================

    /// Persist an enriched article with its keywords and attachments.
    ///
    /// The article row is written first, so the transaction takes the write
    /// lock on its first statement. A link that already exists yields
    /// [`InsertOutcome::Duplicate`] and nothing is written.
    ///
    /// Keywords are merged by word: an existing row is reused, otherwise a new
    /// one is created. Image and media attachments are resolved by unique
    /// filename inside savepoints; on a uniqueness conflict the write is
    /// narrowed (reuse the existing row, then no attachment at all) so an
    /// attachment conflict never drops the article itself.
    pub async fn insert_article(&self, article: &NewArticle) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO articles (source_id, link, title, content, date)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(link) DO NOTHING
            RETURNING id
        "#,
        )
        .bind(article.source_id)
        .bind(&article.link)
        .bind(&article.title)
        .bind(&article.content)
        .bind(article.date)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((article_id,)) = inserted else {
            tx.rollback().await?;
            return Ok(InsertOutcome::Duplicate);
        };

        for word in &article.keywords {
            sqlx::query("INSERT INTO keywords (word) VALUES (?) ON CONFLICT(word) DO NOTHING")
                .bind(word)
                .execute(&mut *tx)
                .await?;
            let (keyword_id,): (i64,) = sqlx::query_as("SELECT id FROM keywords WHERE word = ?")
                .bind(word)
                .fetch_one(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT OR IGNORE INTO article_keywords (article_id, keyword_id) VALUES (?, ?)",
            )
            .bind(article_id)
            .bind(keyword_id)
            .execute(&mut *tx)
            .await?;
        }

        let image_attached = match &article.image {
            Some(image) => attach_image(&mut *tx, article_id, image).await?,
            None => false,
        };

        let media_attached = match &article.media {
            Some(filename) => attach_media(&mut *tx, article_id, filename).await?,
            None => false,
        };

        tx.commit().await?;

        Ok(InsertOutcome::Inserted {
            article_id,
            image_attached,
            media_attached,
        })
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    pub async fn get_article(&self, article_id: i64) -> Result<Option<Article>> {
        let row = sqlx::query_as::<_, ArticleDbRow>(&format!("{ARTICLE_SELECT} WHERE a.id = ?"))
            .bind(article_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ArticleDbRow::into_article))
    }

    pub async fn get_article_by_link(&self, link: &str) -> Result<Option<Article>> {
        let row =
            sqlx::query_as::<_, ArticleDbRow>(&format!("{ARTICLE_SELECT} WHERE a.link = ?"))
                .bind(link)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(ArticleDbRow::into_article))
    }

    /// Articles of one source, newest first. Capped at MAX_ARTICLES.
    pub async fn get_articles_for_source(
        &self,
        source_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Article>> {
        let limit = limit.unwrap_or(500).min(MAX_ARTICLES);
        let rows = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "{ARTICLE_SELECT} WHERE a.source_id = ? ORDER BY a.date DESC, a.id DESC LIMIT ?"
        ))
        .bind(source_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    /// Articles tagged with a keyword, newest first.
    pub async fn get_articles_for_keyword(
        &self,
        keyword_id: i64,
        unread_only: bool,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Article>> {
        let limit = limit.clamp(0, MAX_ARTICLES);
        let rows = sqlx::query_as::<_, ArticleDbRow>(&format!(
            r#"{ARTICLE_SELECT}
            JOIN article_keywords ak ON ak.article_id = a.id
            WHERE ak.keyword_id = ? AND (? = 0 OR a.times_read = 0)
            ORDER BY a.date DESC, a.id DESC
            LIMIT ? OFFSET ?"#
        ))
        .bind(keyword_id)
        .bind(unread_only)
        .bind(limit)
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    /// The stored image record of an article, with its pixel dimensions.
    pub async fn get_article_image(&self, article_id: i64) -> Result<Option<Image>> {
        let image = sqlx::query_as::<_, Image>(
            r#"
            SELECT i.id, i.filename, i.width, i.height
            FROM images i JOIN articles a ON a.image_id = i.id
            WHERE a.id = ?
        "#,
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(image)
    }

    /// Keyword words of an article, alphabetical.
    pub async fn get_article_keywords(&self, article_id: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT k.word FROM keywords k
            JOIN article_keywords ak ON ak.keyword_id = k.id
            WHERE ak.article_id = ?
            ORDER BY k.word
        "#,
        )
        .bind(article_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(w,)| w).collect())
    }

    /// Unread, not-too-often-skipped articles in storage order (newest first),
    /// with the click counters of their keywords attached.
    ///
    /// This is the raw candidate window for ranking; callers over-fetch and
    /// let [`crate::ranking::rank`] pick the top of it.
    pub async fn get_rank_candidates(
        &self,
        offset: i64,
        limit: i64,
        max_skips: i64,
    ) -> Result<Vec<RankCandidate>> {
        let limit = limit.clamp(0, MAX_ARTICLES);
        let rows = sqlx::query_as::<_, ArticleDbRow>(&format!(
            r#"{ARTICLE_SELECT}
            WHERE a.times_read = 0 AND a.skip_count <= ?
            ORDER BY a.date DESC, a.id DESC
            LIMIT ? OFFSET ?"#
        ))
        .bind(max_skips)
        .bind(limit)
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            r#"SELECT ak.article_id, k.click_count
               FROM article_keywords ak JOIN keywords k ON k.id = ak.keyword_id
               WHERE ak.article_id IN ("#,
        );
        let mut separated = builder.separated(", ");
        for row in &rows {
            separated.push_bind(row.id);
        }
        separated.push_unseparated(")");

        let clicks: Vec<(i64, i64)> = builder.build_query_as().fetch_all(&self.pool).await?;
        let mut by_article: HashMap<i64, Vec<i64>> = HashMap::new();
        for (article_id, click_count) in clicks {
            by_article.entry(article_id).or_default().push(click_count);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let keyword_clicks = by_article.remove(&row.id).unwrap_or_default();
                RankCandidate {
                    article: row.into_article(),
                    keyword_clicks,
                }
            })
            .collect())
    }

    // ========================================================================
    // Article Mutations
    // ========================================================================

    /// Record a read: increments `times_read` and stamps `last_read`.
    /// Returns whether the article exists.
    pub async fn mark_read(&self, article_id: i64) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE articles SET times_read = times_read + 1, last_read = ? WHERE id = ?",
        )
        .bind(now)
        .bind(article_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a skip, returning the new skip count.
    pub async fn skip_article(&self, article_id: i64) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE articles SET skip_count = skip_count + 1 WHERE id = ? RETURNING skip_count",
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(count,)| count))
    }
}

// ============================================================================
// Attachment Resolution
// ============================================================================

/// Attach an image to a freshly inserted article, narrowing on conflict:
/// 1. create a new image row,
/// 2. on a uniqueness conflict, reuse the stored row with the same filename,
/// 3. otherwise leave the article without an image.
async fn attach_image(
    conn: &mut SqliteConnection,
    article_id: i64,
    image: &NewImage,
) -> Result<bool> {
    sqlx::query("SAVEPOINT attach_image").execute(&mut *conn).await?;

    let created: Result<(i64,), sqlx::Error> = sqlx::query_as(
        "INSERT INTO images (filename, width, height) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(&image.filename)
    .bind(i64::from(image.width))
    .bind(i64::from(image.height))
    .fetch_one(&mut *conn)
    .await;

    let image_id = match created {
        Ok((id,)) => Some(id),
        Err(e) => {
            sqlx::query("ROLLBACK TO attach_image").execute(&mut *conn).await?;
            if is_unique_violation(&e) {
                tracing::debug!(filename = %image.filename, "Image already stored, reusing row");
            } else {
                tracing::warn!(filename = %image.filename, error = %e, "Image insert failed, retrying with stored row");
            }
            let existing: Result<Option<(i64,)>, sqlx::Error> =
                sqlx::query_as("SELECT id FROM images WHERE filename = ?")
                    .bind(&image.filename)
                    .fetch_optional(&mut *conn)
                    .await;
            match existing {
                Ok(found) => found.map(|(id,)| id),
                Err(e) => {
                    tracing::warn!(filename = %image.filename, error = %e, "Image lookup failed, storing article without image");
                    None
                }
            }
        }
    };

    let attached = match image_id {
        Some(id) => link_attachment(conn, "image_id", article_id, id).await,
        None => false,
    };

    if !attached {
        sqlx::query("ROLLBACK TO attach_image").execute(&mut *conn).await?;
    }
    sqlx::query("RELEASE attach_image").execute(&mut *conn).await?;
    Ok(attached)
}

/// Attach a media reference, reusing an existing row with the same filename.
async fn attach_media(conn: &mut SqliteConnection, article_id: i64, filename: &str) -> Result<bool> {
    sqlx::query("SAVEPOINT attach_media").execute(&mut *conn).await?;

    let resolved: Result<(i64,), sqlx::Error> = async {
        sqlx::query("INSERT INTO media (filename) VALUES (?) ON CONFLICT(filename) DO NOTHING")
            .bind(filename)
            .execute(&mut *conn)
            .await?;
        sqlx::query_as("SELECT id FROM media WHERE filename = ?")
            .bind(filename)
            .fetch_one(&mut *conn)
            .await
    }
    .await;

    let attached = match resolved {
        Ok((media_id,)) => link_attachment(conn, "media_id", article_id, media_id).await,
        Err(e) => {
            tracing::warn!(filename = %filename, error = %e, "Media attachment failed, storing article without media");
            false
        }
    };

    if !attached {
        sqlx::query("ROLLBACK TO attach_media").execute(&mut *conn).await?;
    }
    sqlx::query("RELEASE attach_media").execute(&mut *conn).await?;
    Ok(attached)
}

async fn link_attachment(
    conn: &mut SqliteConnection,
    column: &'static str,
    article_id: i64,
    attachment_id: i64,
) -> bool {
    let result = sqlx::query(&format!("UPDATE articles SET {column} = ? WHERE id = ?"))
        .bind(attachment_id)
        .bind(article_id)
        .execute(&mut *conn)
        .await;
    match result {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(column, article_id, error = %e, "Failed to link attachment");
            false
        }
    }
}
