//! Two-stage fetch/enrich pipeline.
//!
//! Stage A workers pull source links from a queue, fetch and fingerprint the
//! feed document, and push the entries of changed feeds onto a bounded entry
//! queue. Stage B workers pull entries and run them through the [`Enricher`].
//! A cycle ends when both queues are closed and every worker has returned.

mod progress;

pub use progress::{Progress, ProgressTracker};

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::enrich::{canonical_link, EnrichSettings, Enricher};
use crate::feed::{fingerprint_with_retry, parse_feed, FeedEntry, Fetcher};
use crate::storage::{Database, DedupStore, Source};

/// Worker pool sizes and feed retrieval limits for one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub fetch_workers: usize,
    pub enrich_workers: usize,
    pub feed_timeout: Duration,
    pub fingerprint_attempts: u32,
    pub fingerprint_retry_delay: Duration,
    pub entry_queue_capacity: usize,
    /// Zero disables the progress reporter
    pub progress_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let workers = default_worker_count();
        Self {
            fetch_workers: workers,
            enrich_workers: workers,
            feed_timeout: Duration::from_secs(10),
            fingerprint_attempts: 4,
            fingerprint_retry_delay: Duration::from_millis(250),
            entry_queue_capacity: 256,
            progress_interval: Duration::from_secs(1),
        }
    }
}

/// `max(1, cores - 1)`
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// The document changed and `queued` entries were handed to stage B
    Changed { queued: usize },
    /// Fingerprint matched the previous poll
    Unchanged,
    /// The feed could not be fetched or parsed
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePoll {
    pub link: String,
    pub status: PollStatus,
    pub new_articles: usize,
}

/// Outcome of one pipeline cycle, in the order the sources were given.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub polls: Vec<SourcePoll>,
}

impl CycleReport {
    /// Sources that yielded at least one new article.
    pub fn productive_sources(&self) -> Vec<&str> {
        self.polls
            .iter()
            .filter(|p| p.new_articles > 0)
            .map(|p| p.link.as_str())
            .collect()
    }

    pub fn new_articles(&self) -> usize {
        self.polls.iter().map(|p| p.new_articles).sum()
    }

    pub fn poll(&self, link: &str) -> Option<&SourcePoll> {
        self.polls.iter().find(|p| p.link == link)
    }
}

struct QueuedEntry {
    entry: FeedEntry,
    source: Arc<Source>,
}

type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// Cheap to clone; each worker task owns a clone.
#[derive(Clone)]
pub struct Pipeline {
    db: Database,
    dedup: DedupStore,
    fetcher: Fetcher,
    enricher: Enricher,
    settings: PipelineSettings,
    progress_tx: Option<mpsc::Sender<Progress>>,
}

impl Pipeline {
    pub fn new(
        db: Database,
        fetcher: Fetcher,
        enrich: EnrichSettings,
        settings: PipelineSettings,
    ) -> Self {
        let dedup = DedupStore::new(db.clone());
        let enricher = Enricher::new(fetcher.clone(), dedup.clone(), enrich);
        Self {
            db,
            dedup,
            fetcher,
            enricher,
            settings,
            progress_tx: None,
        }
    }

    /// Also deliver progress snapshots on `tx`.
    pub fn with_progress(mut self, tx: mpsc::Sender<Progress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Poll `links` once and enrich every new entry.
    ///
    /// Returns after all queued work of both stages has finished. Individual
    /// failures are logged and reported per source; they never abort the cycle.
    pub async fn run_cycle(&self, links: &[String]) -> CycleReport {
        if links.is_empty() {
            return CycleReport::default();
        }

        let tracker = Arc::new(ProgressTracker::new(links.len()));

        let (link_tx, link_rx) = mpsc::channel::<String>(links.len());
        for link in links {
            if link_tx.send(link.clone()).await.is_err() {
                break;
            }
        }
        // closed queue is the drain signal for stage A
        drop(link_tx);
        let link_rx: SharedReceiver<String> = Arc::new(Mutex::new(link_rx));

        let (entry_tx, entry_rx) =
            mpsc::channel::<QueuedEntry>(self.settings.entry_queue_capacity.max(1));
        let entry_rx: SharedReceiver<QueuedEntry> = Arc::new(Mutex::new(entry_rx));

        let mut fetch_workers = JoinSet::new();
        for worker in 0..self.settings.fetch_workers.max(1) {
            let stage = self.clone();
            let links = Arc::clone(&link_rx);
            let entries = entry_tx.clone();
            let tracker = Arc::clone(&tracker);
            fetch_workers.spawn(async move { stage.fetch_worker(worker, links, entries, tracker).await });
        }
        // stage B drains once every fetch worker has dropped its sender
        drop(entry_tx);

        let mut enrich_workers = JoinSet::new();
        for worker in 0..self.settings.enrich_workers.max(1) {
            let stage = self.clone();
            let entries = Arc::clone(&entry_rx);
            let tracker = Arc::clone(&tracker);
            enrich_workers.spawn(async move { stage.enrich_worker(worker, entries, tracker).await });
        }

        let reporter = (!self.settings.progress_interval.is_zero()).then(|| {
            tokio::spawn(progress::report(
                Arc::clone(&tracker),
                self.progress_tx.clone(),
                self.settings.progress_interval,
            ))
        });

        let mut polls: HashMap<String, SourcePoll> = HashMap::new();
        while let Some(joined) = fetch_workers.join_next().await {
            match joined {
                Ok(results) => {
                    for poll in results {
                        polls.insert(poll.link.clone(), poll);
                    }
                }
                Err(e) => tracing::error!(error = %e, "Fetch worker panicked"),
            }
        }
        while let Some(joined) = enrich_workers.join_next().await {
            match joined {
                Ok(counts) => {
                    for (link, new_articles) in counts {
                        if let Some(poll) = polls.get_mut(&link) {
                            poll.new_articles += new_articles;
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "Enrich worker panicked"),
            }
        }

        if let Some(handle) = reporter {
            handle.abort();
        }
        let last = tracker.snapshot();
        if let Some(tx) = &self.progress_tx {
            if let Err(e) = tx.send(last.clone()).await {
                tracing::warn!(error = %e, "Progress channel send failed (receiver dropped)");
            }
        }

        let report = CycleReport {
            polls: links.iter().filter_map(|l| polls.remove(l)).collect(),
        };
        tracing::info!(
            sources = report.polls.len(),
            productive = report.productive_sources().len(),
            new_articles = report.new_articles(),
            elapsed_ms = last.elapsed.as_millis() as u64,
            "Cycle complete"
        );
        report
    }

    // ========================================================================
    // Stage A
    // ========================================================================

    async fn fetch_worker(
        self,
        worker: usize,
        links: SharedReceiver<String>,
        entries: mpsc::Sender<QueuedEntry>,
        tracker: Arc<ProgressTracker>,
    ) -> Vec<SourcePoll> {
        let mut polls = Vec::new();
        loop {
            let next = links.lock().await.recv().await;
            let Some(link) = next else {
                break;
            };

            let status = match self.poll_source(&link, &entries, &tracker).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(worker, source = %link, error = %e, "Source poll failed");
                    PollStatus::Failed
                }
            };
            tracker.source_done();
            polls.push(SourcePoll {
                link,
                status,
                new_articles: 0,
            });
        }
        polls
    }

    async fn poll_source(
        &self,
        link: &str,
        entries: &mpsc::Sender<QueuedEntry>,
        tracker: &ProgressTracker,
    ) -> Result<PollStatus> {
        let source = match self.db.get_source(link).await? {
            Some(source) => source,
            None => {
                self.db.subscribe(link).await?;
                self.db
                    .get_source(link)
                    .await?
                    .context("source missing right after subscribing")?
            }
        };

        let timeout = self.settings.feed_timeout;
        let fetched = fingerprint_with_retry(
            self.settings.fingerprint_attempts,
            self.settings.fingerprint_retry_delay,
            move || async move { self.fetcher.fetch(link, timeout).await.map(|doc| doc.body) },
        )
        .await;
        let Some((body, fingerprint)) = fetched else {
            tracing::warn!(source = %link, "Feed unreachable, treating as unchanged");
            return Ok(PollStatus::Failed);
        };

        if fingerprint.matches(source.fingerprint.as_deref()) {
            tracing::debug!(source = %link, "Feed unchanged");
            return Ok(PollStatus::Unchanged);
        }

        let document = match parse_feed(&body) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(source = %link, error = %e, "Feed could not be parsed");
                return Ok(PollStatus::Failed);
            }
        };

        let title = document.title_or(link).to_string();
        self.db
            .record_source_change(source.id, &title, fingerprint.as_str())
            .await?;
        let source = Arc::new(Source {
            title: Arc::from(title.as_str()),
            fingerprint: Some(fingerprint.to_string()),
            ..source
        });

        let total = document.entries.len();
        let mut queued = 0usize;
        for entry in document.entries {
            if let Some(canonical) = canonical_link(&entry, link) {
                if self.dedup.contains(&canonical).await? {
                    continue;
                }
            }
            tracker.entry_queued();
            let item = QueuedEntry {
                entry,
                source: Arc::clone(&source),
            };
            if entries.send(item).await.is_err() {
                tracing::warn!(source = %link, "Entry queue closed early");
                break;
            }
            queued += 1;
        }

        tracing::info!(source = %link, title = %title, entries = total, queued, "Feed changed");
        Ok(PollStatus::Changed { queued })
    }

    // ========================================================================
    // Stage B
    // ========================================================================

    async fn enrich_worker(
        self,
        worker: usize,
        entries: SharedReceiver<QueuedEntry>,
        tracker: Arc<ProgressTracker>,
    ) -> HashMap<String, usize> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        loop {
            let next = entries.lock().await.recv().await;
            let Some(QueuedEntry { entry, source }) = next else {
                break;
            };

            match self.enricher.enrich(&entry, &source).await {
                Ok(outcome) => {
                    *counts.entry(source.link.clone()).or_default() += outcome.new_articles();
                }
                Err(e) => {
                    tracing::warn!(worker, source = %source.link, title = %entry.title, error = %e, "Entry enrichment failed");
                }
            }
            tracker.entry_done();
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FetchPolicy;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss(items: &[(&str, &str)]) -> String {
        let items: String = items
            .iter()
            .map(|(link, title)| {
                format!("<item><title>{title}</title><link>{link}</link><guid isPermaLink=\"false\">{link}</guid></item>")
            })
            .collect();
        format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Test Feed</title>{items}</channel></rss>"#)
    }

    async fn pipeline() -> Pipeline {
        let db = Database::open(":memory:").await.unwrap();
        let fetcher = Fetcher::new(&FetchPolicy::default()).unwrap();
        Pipeline::new(
            db,
            fetcher,
            EnrichSettings {
                page_timeout: Duration::from_millis(500),
                retry_delay: Duration::from_millis(10),
                ..EnrichSettings::default()
            },
            PipelineSettings {
                fetch_workers: 2,
                enrich_workers: 3,
                feed_timeout: Duration::from_millis(500),
                fingerprint_attempts: 2,
                fingerprint_retry_delay: Duration::from_millis(10),
                entry_queue_capacity: 2,
                progress_interval: Duration::from_millis(50),
            },
        )
    }

    #[tokio::test]
    async fn test_changed_then_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[
                ("a", "Mars Rover Update"),
                ("b", "Mars Rover Update"),
            ])))
            .mount(&server)
            .await;
        for page in ["/a", "/b"] {
            Mock::given(method("GET"))
                .and(path(page))
                .respond_with(ResponseTemplate::new(200).set_body_string("<p>page</p>"))
                .expect(1)
                .mount(&server)
                .await;
        }

        let pipeline = pipeline().await;
        let feed = format!("{}/rss", server.uri());
        let links = vec![feed.clone()];

        let first = pipeline.run_cycle(&links).await;
        assert_eq!(first.new_articles(), 2);
        assert_eq!(first.productive_sources(), vec![feed.as_str()]);
        assert_eq!(
            first.poll(&feed).unwrap().status,
            PollStatus::Changed { queued: 2 }
        );

        let source = pipeline.database().get_source(&feed).await.unwrap().unwrap();
        assert_eq!(&*source.title, "Test Feed");

        let second = pipeline.run_cycle(&links).await;
        assert_eq!(second.new_articles(), 0);
        assert_eq!(second.poll(&feed).unwrap().status, PollStatus::Unchanged);
        assert!(second.productive_sources().is_empty());
    }

    #[tokio::test]
    async fn test_many_entries_through_small_queue() {
        let server = MockServer::start().await;
        let items: Vec<(String, String)> = (0..12)
            .map(|i| (format!("post/{i}"), format!("Post {i}")))
            .collect();
        let borrowed: Vec<(&str, &str)> = items.iter().map(|(l, t)| (l.as_str(), t.as_str())).collect();
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&borrowed)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>page</p>"))
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::channel(1024);
        let pipeline = pipeline().await.with_progress(tx);
        let report = pipeline.run_cycle(&[format!("{}/rss", server.uri())]).await;
        assert_eq!(report.new_articles(), 12);

        let mut last = None;
        while let Ok(p) = rx.try_recv() {
            last = Some(p);
        }
        let last = last.unwrap();
        assert!(last.is_finished());
        assert_eq!(last.entries_done, 12);
    }

    #[tokio::test]
    async fn test_unreachable_feed_is_failed_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not a feed"))
            .mount(&server)
            .await;

        let pipeline = pipeline().await;
        let links: Vec<String> = ["/slow", "/ok", "/garbage"]
            .iter()
            .map(|p| format!("{}{p}", server.uri()))
            .collect();
        let report = pipeline.run_cycle(&links).await;

        let statuses: Vec<PollStatus> = report.polls.iter().map(|p| p.status).collect();
        assert_eq!(
            statuses,
            vec![
                PollStatus::Failed,
                PollStatus::Changed { queued: 0 },
                PollStatus::Failed
            ]
        );
        assert_eq!(report.new_articles(), 0);
    }

    #[tokio::test]
    async fn test_empty_cycle() {
        let report = pipeline().await.run_cycle(&[]).await;
        assert!(report.polls.is_empty());
    }
}
