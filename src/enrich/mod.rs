//! Turns feed entries into stored articles.
//!
//! - [`link`] - canonical article identity
//! - [`language`] - stopword-based language guess
//! - [`boilerplate`] - main-text extraction from article pages
//! - [`images`] - representative image selection
//! - [`media`] - embeddable video detection
//! - [`keywords`] - title keyword extraction

pub mod boilerplate;
pub mod images;
pub mod keywords;
pub mod language;
pub mod link;
pub mod media;

use anyhow::Result;
use std::time::Duration;

use crate::feed::{FeedEntry, Fetcher};
use crate::storage::{DedupStore, InsertOutcome, NewArticle, NewImage, Source};

pub use boilerplate::{remove_boilerplate, ExtractError};
pub use images::{find_picture, PictureCandidate};
pub use keywords::title_keywords;
pub use language::{guess_language, Language};
pub use link::canonical_link;
pub use media::find_media;

/// Timeouts and limits for enrichment network calls.
#[derive(Debug, Clone)]
pub struct EnrichSettings {
    pub page_timeout: Duration,
    pub page_attempts: u32,
    pub retry_delay: Duration,
    pub image_timeout: Duration,
    pub max_image_candidates: usize,
}

impl Default for EnrichSettings {
    fn default() -> Self {
        Self {
            page_timeout: Duration::from_secs(10),
            page_attempts: 3,
            retry_delay: Duration::from_millis(250),
            image_timeout: Duration::from_secs(3),
            max_image_candidates: 8,
        }
    }
}

/// What happened to one feed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichOutcome {
    /// A new article was stored
    Stored { article_id: i64 },
    /// The link is already stored or being enriched by another worker
    Known,
    /// The entry has no usable link
    NoLink,
    /// Persisting failed; the entry is dropped for this cycle
    Dropped,
}

impl EnrichOutcome {
    /// Contribution to a source's new-article count.
    pub fn new_articles(&self) -> usize {
        usize::from(matches!(self, EnrichOutcome::Stored { .. }))
    }
}

/// Enriches entries and persists them. Cheap to clone; one per worker.
#[derive(Clone)]
pub struct Enricher {
    fetcher: Fetcher,
    dedup: DedupStore,
    settings: EnrichSettings,
}

impl Enricher {
    pub fn new(fetcher: Fetcher, dedup: DedupStore, settings: EnrichSettings) -> Self {
        Self {
            fetcher,
            dedup,
            settings,
        }
    }

    /// Enrich one entry and store it if its link is new.
    ///
    /// Network failures never fail the entry: a page that cannot be fetched
    /// yields content from the feed summary, and a missing image or video is
    /// simply absent. Only a database error on the existence check is
    /// returned to the caller.
    pub async fn enrich(&self, entry: &FeedEntry, source: &Source) -> Result<EnrichOutcome> {
        let Some(link) = canonical_link(entry, &source.link) else {
            tracing::debug!(source = %source.link, id = %entry.id, "Entry has no usable link");
            return Ok(EnrichOutcome::NoLink);
        };

        if self.dedup.contains(&link).await? {
            return Ok(EnrichOutcome::Known);
        }
        let Some(_claim) = self.dedup.claim(&link) else {
            tracing::debug!(link = %link, "Link already being enriched");
            return Ok(EnrichOutcome::Known);
        };
        // another worker may have stored the link between the check and the claim
        if self.dedup.contains(&link).await? {
            return Ok(EnrichOutcome::Known);
        }

        let article = self.build_article(entry, source, link).await;

        match self.dedup.database().insert_article(&article).await {
            Ok(InsertOutcome::Inserted {
                article_id,
                image_attached,
                media_attached,
            }) => {
                tracing::info!(
                    article_id,
                    link = %article.link,
                    keywords = article.keywords.len(),
                    image = image_attached,
                    media = media_attached,
                    "Stored article"
                );
                Ok(EnrichOutcome::Stored { article_id })
            }
            Ok(InsertOutcome::Duplicate) => Ok(EnrichOutcome::Known),
            Err(e) => {
                tracing::warn!(link = %article.link, error = %e, "Failed to store article, dropping entry");
                Ok(EnrichOutcome::Dropped)
            }
        }
    }

    async fn build_article(&self, entry: &FeedEntry, source: &Source, link: String) -> NewArticle {
        let page = self.fetch_page(&link).await;

        let mut content = if page.trim().is_empty() {
            String::new()
        } else {
            let language = guess_language(&boilerplate::plain_text(&page));
            match remove_boilerplate(&page, language) {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(link = %link, error = %e, "Keeping raw page");
                    page.clone()
                }
            }
        };
        if content.trim().is_empty() {
            if let Some(summary) = entry.summary.as_deref() {
                content = boilerplate::plain_text(summary);
            }
        }

        let image = if page.is_empty() {
            None
        } else {
            find_picture(
                &self.fetcher,
                &page,
                &link,
                self.settings.max_image_candidates,
                self.settings.image_timeout,
            )
            .await
            .map(|picked| NewImage {
                filename: picked.filename(),
                width: picked.width,
                height: picked.height,
            })
        };

        NewArticle {
            source_id: source.id,
            keywords: title_keywords(&entry.title),
            title: entry.title.clone(),
            date: entry
                .published
                .unwrap_or_else(|| chrono::Utc::now().timestamp()),
            media: find_media(&page),
            image,
            content,
            link,
        }
    }

    /// Article page HTML, or an empty string if it cannot be retrieved.
    async fn fetch_page(&self, link: &str) -> String {
        if link.to_ascii_lowercase().ends_with(".pdf") {
            return String::new();
        }

        let attempts = self.settings.page_attempts.max(1);
        for attempt in 1..=attempts {
            match self.fetcher.fetch(link, self.settings.page_timeout).await {
                Ok(doc) => return doc.text(),
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::debug!(link = %link, attempt, error = %e, "Page fetch failed, retrying");
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => {
                    tracing::warn!(link = %link, attempt, error = %e, "Page fetch failed");
                    break;
                }
            }
        }
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FetchPolicy;
    use crate::storage::Database;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &str = "The rover has been driving across the surface of the planet for more \
        than a decade and it is still sending back data that the team on the ground uses to plan \
        the next steps of the mission. It was not expected to last this long, but the engineers \
        who built it are very proud of what they have done with it.";

    async fn setup(server: &MockServer) -> (Enricher, Database, Source) {
        let db = Database::open(":memory:").await.unwrap();
        let feed_url = format!("{}/rss", server.uri());
        db.subscribe(&feed_url).await.unwrap();
        let source = db.get_source(&feed_url).await.unwrap().unwrap();
        let fetcher = Fetcher::new(&FetchPolicy::default()).unwrap();
        let settings = EnrichSettings {
            page_timeout: Duration::from_millis(500),
            retry_delay: Duration::from_millis(10),
            ..EnrichSettings::default()
        };
        let enricher = Enricher::new(fetcher, DedupStore::new(db.clone()), settings);
        (enricher, db, source)
    }

    fn entry(link: &str, title: &str) -> FeedEntry {
        FeedEntry {
            link: Some(link.to_string()),
            id: String::new(),
            title: title.to_string(),
            published: Some(1_700_000_000),
            summary: Some("<p>Feed <b>summary</b></p>".to_string()),
        }
    }

    #[tokio::test]
    async fn test_enrich_stores_article_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<html><body><nav><a href="/">Home</a></nav><p>{BODY}</p>
                <iframe src="https://www.youtube.com/embed/abcdefgh"></iframe></body></html>"#
            )))
            .expect(1)
            .mount(&server)
            .await;

        let (enricher, db, source) = setup(&server).await;
        let e = entry("a", "Mars Rover Update");

        let first = enricher.enrich(&e, &source).await.unwrap();
        assert!(matches!(first, EnrichOutcome::Stored { .. }));
        assert_eq!(first.new_articles(), 1);

        let second = enricher.enrich(&e, &source).await.unwrap();
        assert_eq!(second, EnrichOutcome::Known);
        assert_eq!(second.new_articles(), 0);

        let stored = db
            .get_article_by_link(&format!("{}/a", server.uri()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.date, 1_700_000_000);
        assert!(stored.content.starts_with("The rover has been driving"));
        assert!(!stored.content.contains("Home"));
        assert_eq!(
            stored.media.unwrap().filename,
            "https://www.youtube.com/embed/abcdefgh"
        );
        let mut keywords = db.get_article_keywords(stored.id).await.unwrap();
        keywords.sort();
        assert_eq!(keywords, vec!["mars", "rover", "update"]);
    }

    #[tokio::test]
    async fn test_concurrent_enrich_of_same_link_fetches_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("<html><body><p>{BODY}</p></body></html>"))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (enricher, db, source) = setup(&server).await;
        let e = entry("a", "Mars Rover Update");
        let (first, second) = tokio::join!(enricher.enrich(&e, &source), enricher.enrich(&e, &source));

        let new_articles = first.unwrap().new_articles() + second.unwrap().new_articles();
        assert_eq!(new_articles, 1);
        assert!(db.article_exists(&format!("{}/a", server.uri())).await.unwrap());
    }

    #[tokio::test]
    async fn test_same_basename_images_stay_distinct() {
        let server = MockServer::start().await;
        for (dir, size) in [("one", 10), ("two", 300)] {
            let mut png = std::io::Cursor::new(Vec::new());
            image::RgbImage::new(size, size)
                .write_to(&mut png, image::ImageFormat::Png)
                .unwrap();
            Mock::given(method("GET"))
                .and(path(format!("/{dir}/photo.png")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(png.into_inner()))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(format!("/{dir}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                    r#"<html><body><img src="/{dir}/photo.png"><p>{BODY}</p></body></html>"#
                )))
                .mount(&server)
                .await;
        }

        let (enricher, db, source) = setup(&server).await;
        let mut ids = Vec::new();
        for dir in ["one", "two"] {
            let outcome = enricher.enrich(&entry(dir, "Photo"), &source).await.unwrap();
            let EnrichOutcome::Stored { article_id } = outcome else {
                panic!("expected stored, got {outcome:?}");
            };
            ids.push(article_id);
        }

        let second = db.get_article(ids[1]).await.unwrap().unwrap();
        assert_eq!(
            second.image.as_deref(),
            Some(format!("{}/two/photo.png", server.uri()).as_str())
        );
        let first_image = db.get_article_image(ids[0]).await.unwrap().unwrap();
        let second_image = db.get_article_image(ids[1]).await.unwrap().unwrap();
        assert_ne!(first_image.id, second_image.id);
        assert_eq!((first_image.width, first_image.height), (10, 10));
        assert_eq!((second_image.width, second_image.height), (300, 300));
    }

    #[tokio::test]
    async fn test_unreachable_page_falls_back_to_summary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let (enricher, db, source) = setup(&server).await;
        let outcome = enricher.enrich(&entry("gone", "Gone"), &source).await.unwrap();
        let EnrichOutcome::Stored { article_id } = outcome else {
            panic!("expected stored, got {outcome:?}");
        };

        let stored = db.get_article(article_id).await.unwrap().unwrap();
        assert_eq!(&*stored.content, "Feed summary");
        assert!(stored.image.is_none());
        assert!(stored.media.is_none());
    }

    #[tokio::test]
    async fn test_pdf_link_is_not_fetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (enricher, _db, source) = setup(&server).await;
        let outcome = enricher
            .enrich(&entry("paper.PDF", "Paper"), &source)
            .await
            .unwrap();
        assert!(matches!(outcome, EnrichOutcome::Stored { .. }));
    }

    #[tokio::test]
    async fn test_entry_without_link() {
        let server = MockServer::start().await;
        let (enricher, _db, source) = setup(&server).await;
        let mut e = entry("", "No link");
        e.link = None;
        e.id = "urn:uuid:1".to_string();
        assert_eq!(enricher.enrich(&e, &source).await.unwrap(), EnrichOutcome::NoLink);
    }
}
