use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of frontpage appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

/// Returns true if the error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

// ============================================================================
// Write Models
// ============================================================================

/// Image picked by the enricher, not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
    /// Absolute image URL, the unique key of the `images` table
    pub filename: String,
    pub width: u32,
    pub height: u32,
}

/// A fully enriched article ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub source_id: i64,
    pub link: String,
    pub title: String,
    pub content: String,
    pub date: i64,
    pub keywords: BTreeSet<String>,
    pub image: Option<NewImage>,
    /// Embeddable media reference (player URL)
    pub media: Option<String>,
}

/// Result of [`Database::insert_article`](super::Database::insert_article).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The article was stored. Attachment flags report which optional parts survived.
    Inserted {
        article_id: i64,
        image_attached: bool,
        media_attached: bool,
    },
    /// An article with the same link already exists.
    Duplicate,
}

impl InsertOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, InsertOutcome::Inserted { .. })
    }
}

// ============================================================================
// Internal Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SourceDbRow {
    pub id: i64,
    pub link: String,
    pub title: String,
    pub fingerprint: Option<String>,
    pub poll_timeout_secs: Option<i64>,
    pub last_polled: Option<i64>,
}

impl SourceDbRow {
    pub(crate) fn into_source(self) -> Source {
        Source {
            id: self.id,
            link: self.link,
            title: Arc::from(self.title),
            fingerprint: self.fingerprint,
            poll_timeout_secs: self.poll_timeout_secs,
            last_polled: self.last_polled,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: i64,
    pub source_id: i64,
    pub link: String,
    pub title: String,
    pub content: String,
    pub date: i64,
    pub image: Option<String>,
    pub media: Option<String>,
    pub times_read: i64,
    pub skip_count: i64,
    pub last_read: Option<i64>,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Article {
        Article {
            id: self.id,
            source_id: self.source_id,
            link: self.link,
            title: Arc::from(self.title),
            content: Arc::from(self.content),
            date: self.date,
            image: self.image,
            media: self.media.map(|filename| Media { filename }),
            times_read: self.times_read,
            skip_count: self.skip_count,
            last_read: self.last_read,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed. Identity is the canonical `link`.
///
/// `fingerprint` is the digest of the last feed document that was processed;
/// `poll_timeout_secs` is the persisted adaptive polling interval.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: i64,
    pub link: String,
    pub title: Arc<str>,
    pub fingerprint: Option<String>,
    pub poll_timeout_secs: Option<i64>,
    pub last_polled: Option<i64>,
}

/// A stored article. `image` holds the image filename (its URL) when one was attached.
#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub id: i64,
    pub source_id: i64,
    pub link: String,
    pub title: Arc<str>,
    pub content: Arc<str>,
    pub date: i64,
    pub image: Option<String>,
    pub media: Option<Media>,
    pub times_read: i64,
    pub skip_count: i64,
    pub last_read: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Keyword {
    pub id: i64,
    pub word: String,
    pub click_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Image {
    pub id: i64,
    pub filename: String,
    pub width: i64,
    pub height: i64,
}

/// Embeddable media reference. `filename` is the player URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Media {
    pub filename: String,
}

impl Media {
    /// HTML snippet that embeds the player.
    pub fn embed_html(&self) -> String {
        format!(
            r#"<iframe width="560" height="315" src="{}" frameborder="0" allowfullscreen></iframe>"#,
            self.filename
        )
    }
}

/// An unread article together with the click counters of its keywords,
/// as consumed by the ranking engine.
#[derive(Debug, Clone, Serialize)]
pub struct RankCandidate {
    pub article: Article,
    pub keyword_clicks: Vec<i64>,
}
