//! Adaptive per-source polling.
//!
//! Every source carries its own polling interval. A poll that brings new
//! articles halves the interval, a poll without new articles (including a
//! failed fetch) doubles it, always within `[floor, ceiling]`. Sources that
//! change often are therefore checked often, and quiet ones rarely.

use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::pipeline::{CycleReport, Pipeline};
use crate::storage::Source;

/// Bounds for the polling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub floor: Duration,
    pub ceiling: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(16),
            ceiling: Duration::from_secs(86_400),
        }
    }
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let floor = floor.max(Duration::from_secs(1));
        Self {
            floor,
            ceiling: ceiling.max(floor),
        }
    }

    pub fn clamp(&self, timeout: Duration) -> Duration {
        timeout.min(self.ceiling).max(self.floor)
    }

    /// `max(floor, timeout / 2)`
    pub fn shorten(&self, timeout: Duration) -> Duration {
        self.clamp(timeout / 2)
    }

    /// `min(ceiling, timeout * 2)`
    pub fn lengthen(&self, timeout: Duration) -> Duration {
        self.clamp(timeout.saturating_mul(2))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollState {
    pub timeout: Duration,
    pub next_due: Instant,
}

impl PollState {
    /// A new subscription: shortest interval, due immediately.
    pub fn new(backoff: &Backoff, now: Instant) -> Self {
        Self {
            timeout: backoff.floor,
            next_due: now,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due <= now
    }

    pub fn on_new_content(&mut self, backoff: &Backoff, now: Instant) {
        self.timeout = backoff.shorten(self.timeout);
        self.next_due = now + self.timeout;
    }

    pub fn on_no_content(&mut self, backoff: &Backoff, now: Instant) {
        self.timeout = backoff.lengthen(self.timeout);
        self.next_due = now + self.timeout;
    }
}

/// Polling state of every known source.
#[derive(Debug, Clone)]
pub struct PollPlan {
    backoff: Backoff,
    states: HashMap<String, PollState>,
}

impl PollPlan {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            states: HashMap::new(),
        }
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn state(&self, link: &str) -> Option<&PollState> {
        self.states.get(link)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Track a source that was never polled.
    pub fn add(&mut self, link: &str, now: Instant) {
        self.states
            .entry(link.to_string())
            .or_insert_with(|| PollState::new(&self.backoff, now));
    }

    /// Track a source with an interval persisted by an earlier run.
    ///
    /// The stored interval is clamped to the current bounds; the source is
    /// due once that interval has elapsed since `secs_since_poll`.
    pub fn restore(&mut self, link: &str, timeout: Duration, secs_since_poll: u64, now: Instant) {
        let timeout = self.backoff.clamp(timeout);
        let remaining = timeout.saturating_sub(Duration::from_secs(secs_since_poll));
        self.states.insert(
            link.to_string(),
            PollState {
                timeout,
                next_due: now + remaining,
            },
        );
    }

    /// Bring the plan in line with the stored sources: add new ones, drop
    /// unsubscribed ones, keep the state of the rest.
    pub fn sync(&mut self, sources: &[Source], now: Instant, unix_now: i64) {
        self.states
            .retain(|link, _| sources.iter().any(|s| &s.link == link));

        for source in sources {
            if self.states.contains_key(&source.link) {
                continue;
            }
            match (source.poll_timeout_secs, source.last_polled) {
                (Some(timeout), Some(last_polled)) => {
                    let timeout = Duration::from_secs(timeout.max(0) as u64);
                    let elapsed = (unix_now - last_polled).max(0) as u64;
                    self.restore(&source.link, timeout, elapsed, now);
                }
                _ => self.add(&source.link, now),
            }
        }
    }

    /// Sources due at `now`, in a stable order.
    pub fn due(&self, now: Instant) -> Vec<String> {
        let mut due: Vec<String> = self
            .states
            .iter()
            .filter(|(_, state)| state.is_due(now))
            .map(|(link, _)| link.clone())
            .collect();
        due.sort();
        due
    }

    /// Apply the outcome of a poll. Returns the new interval.
    pub fn record(&mut self, link: &str, new_content: bool, now: Instant) -> Option<Duration> {
        let backoff = self.backoff;
        let state = self.states.get_mut(link)?;
        if new_content {
            state.on_new_content(&backoff, now);
        } else {
            state.on_no_content(&backoff, now);
        }
        Some(state.timeout)
    }

    /// Earliest time any source becomes due.
    pub fn next_wakeup(&self) -> Option<Instant> {
        self.states.values().map(|s| s.next_due).min()
    }
}

/// Drives pipeline cycles over the sources that are due.
pub struct Scheduler {
    pipeline: Pipeline,
    plan: PollPlan,
}

impl Scheduler {
    pub fn new(pipeline: Pipeline, backoff: Backoff) -> Self {
        Self {
            pipeline,
            plan: PollPlan::new(backoff),
        }
    }

    pub fn plan(&self) -> &PollPlan {
        &self.plan
    }

    /// One scheduler step: poll every due source once.
    ///
    /// The persisted interval of each polled source is updated. Nothing is
    /// fetched when no source is due.
    pub async fn run_once(&mut self) -> Result<CycleReport> {
        let db = self.pipeline.database().clone();
        let sources = db.list_sources().await?;
        self.plan
            .sync(&sources, Instant::now(), chrono::Utc::now().timestamp());

        let due = self.plan.due(Instant::now());
        if due.is_empty() {
            return Ok(CycleReport::default());
        }
        tracing::info!(due = due.len(), tracked = self.plan.len(), "Polling due sources");

        let report = self.pipeline.run_cycle(&due).await;

        let now = Instant::now();
        for link in &due {
            let new_content = report
                .poll(link)
                .is_some_and(|poll| poll.new_articles > 0);
            let Some(timeout) = self.plan.record(link, new_content, now) else {
                continue;
            };
            tracing::debug!(source = %link, new_content, timeout_secs = timeout.as_secs(), "Next poll scheduled");
            if let Err(e) = db.set_poll_timeout(link, timeout.as_secs() as i64).await {
                tracing::warn!(source = %link, error = %e, "Failed to persist poll interval");
            }
        }
        Ok(report)
    }

    /// Run until `shutdown` turns true or its sender is dropped.
    ///
    /// A cycle in progress always finishes before the loop checks the
    /// signal again.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<Self> {
        tracing::info!(
            floor_secs = self.plan.backoff().floor.as_secs(),
            ceiling_secs = self.plan.backoff().ceiling.as_secs(),
            "Scheduler started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.run_once().await {
                tracing::warn!(error = %e, "Scheduler step failed");
            }

            let wake = self
                .plan
                .next_wakeup()
                .unwrap_or_else(|| Instant::now() + self.plan.backoff().floor);
            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Scheduler stopped");
        Ok(self)
    }
}
