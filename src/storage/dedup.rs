use anyhow::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use super::schema::Database;

/// Key-value view over stored articles keyed by canonical link.
///
/// Besides answering "is this link already stored", it tracks links that are
/// currently being enriched so two workers in the same cycle do not fetch the
/// same page twice. The UNIQUE constraint on `articles.link` remains the
/// final arbiter; the in-flight set only saves work.
#[derive(Clone)]
pub struct DedupStore {
    db: Database,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Releases an in-flight link when dropped.
pub struct LinkClaim {
    link: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for LinkClaim {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.link);
        }
    }
}

impl DedupStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Whether the link is already persisted.
    pub async fn contains(&self, link: &str) -> Result<bool> {
        self.db.article_exists(link).await
    }

    /// Claim a link for enrichment. Returns `None` if another worker holds it.
    pub fn claim(&self, link: &str) -> Option<LinkClaim> {
        let mut set = match self.in_flight.lock() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !set.insert(link.to_string()) {
            return None;
        }
        Some(LinkClaim {
            link: link.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_is_exclusive_until_dropped() {
        let store = DedupStore::new(Database::open(":memory:").await.unwrap());

        let claim = store.claim("https://example.com/a").unwrap();
        assert!(store.claim("https://example.com/a").is_none());
        assert!(store.claim("https://example.com/b").is_some());

        drop(claim);
        assert!(store.claim("https://example.com/a").is_some());
    }

    #[tokio::test]
    async fn test_contains_reflects_storage() {
        let db = Database::open(":memory:").await.unwrap();
        let store = DedupStore::new(db.clone());
        assert!(!store.contains("https://example.com/a").await.unwrap());

        let source_id = db.subscribe("https://example.com/rss").await.unwrap();
        db.insert_article(&crate::storage::NewArticle {
            source_id,
            link: "https://example.com/a".to_string(),
            title: "Title".to_string(),
            content: String::new(),
            date: 0,
            keywords: Default::default(),
            image: None,
            media: None,
        })
        .await
        .unwrap();

        assert!(store.contains("https://example.com/a").await.unwrap());
    }
}
