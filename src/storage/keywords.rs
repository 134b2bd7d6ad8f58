use anyhow::Result;

use super::schema::Database;
use super::types::Keyword;

impl Database {
    // ========================================================================
    // Keyword Queries
    // ========================================================================

    pub async fn get_keyword(&self, word: &str) -> Result<Option<Keyword>> {
        let keyword = sqlx::query_as::<_, Keyword>(
            "SELECT id, word, click_count FROM keywords WHERE word = ?",
        )
        .bind(word.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        Ok(keyword)
    }

    pub async fn get_keyword_by_id(&self, keyword_id: i64) -> Result<Option<Keyword>> {
        let keyword = sqlx::query_as::<_, Keyword>(
            "SELECT id, word, click_count FROM keywords WHERE id = ?",
        )
        .bind(keyword_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(keyword)
    }

    /// Keywords with the highest click counters.
    ///
    /// With `unread_only`, only keywords that tag at least one unread article
    /// are listed.
    pub async fn top_keywords(&self, limit: i64, unread_only: bool) -> Result<Vec<Keyword>> {
        let keywords = sqlx::query_as::<_, Keyword>(
            r#"
            SELECT k.id, k.word, k.click_count
            FROM keywords k
            WHERE ? = 0 OR EXISTS (
                SELECT 1 FROM article_keywords ak
                JOIN articles a ON a.id = ak.article_id
                WHERE ak.keyword_id = k.id AND a.times_read = 0
            )
            ORDER BY k.click_count DESC, k.word
            LIMIT ?
        "#,
        )
        .bind(unread_only)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(keywords)
    }

    // ========================================================================
    // Keyword Feedback
    // ========================================================================

    /// Adjust a keyword's click counter (up-vote `+1`, down-vote `-1`),
    /// returning the new value, or `None` if the keyword does not exist.
    ///
    /// The counter is global: it biases the ranking of every article carrying
    /// this keyword.
    pub async fn vote_keyword(&self, keyword_id: i64, delta: i64) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE keywords SET click_count = click_count + ? WHERE id = ? RETURNING click_count",
        )
        .bind(delta)
        .bind(keyword_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(count,)| count))
    }

    /// [`vote_keyword`](Self::vote_keyword) addressed by word instead of id.
    pub async fn vote_keyword_by_word(&self, word: &str, delta: i64) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE keywords SET click_count = click_count + ? WHERE word = ? RETURNING click_count",
        )
        .bind(delta)
        .bind(word.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(count,)| count))
    }
}
