use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Snapshot of a running cycle. Informational only.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub sources_total: usize,
    pub sources_done: usize,
    pub entries_queued: usize,
    pub entries_done: usize,
    pub elapsed: Duration,
}

impl Progress {
    fn units(&self) -> (usize, usize) {
        (
            self.sources_done + self.entries_done,
            self.sources_total + self.entries_queued,
        )
    }

    /// Completed share of the work known so far, 0.0 to 100.0.
    ///
    /// The denominator grows as feeds yield entries, so the value can drop
    /// between samples.
    pub fn percent(&self) -> f64 {
        let (done, total) = self.units();
        if total == 0 {
            return 100.0;
        }
        (done as f64 / total as f64 * 100.0).min(100.0)
    }

    /// Linear extrapolation of the remaining time from the rate so far.
    pub fn eta(&self) -> Option<Duration> {
        let (done, total) = self.units();
        if done == 0 {
            return None;
        }
        let remaining = total.saturating_sub(done) as f64;
        Some(self.elapsed.mul_f64(remaining / done as f64))
    }

    pub fn is_finished(&self) -> bool {
        let (done, total) = self.units();
        done >= total
    }
}

/// Counters shared by the workers of one cycle.
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    sources_total: usize,
    sources_done: AtomicUsize,
    entries_queued: AtomicUsize,
    entries_done: AtomicUsize,
}

impl ProgressTracker {
    pub fn new(sources_total: usize) -> Self {
        Self {
            started: Instant::now(),
            sources_total,
            sources_done: AtomicUsize::new(0),
            entries_queued: AtomicUsize::new(0),
            entries_done: AtomicUsize::new(0),
        }
    }

    pub fn source_done(&self) {
        self.sources_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn entry_queued(&self) {
        self.entries_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn entry_done(&self) {
        self.entries_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            sources_total: self.sources_total,
            sources_done: self.sources_done.load(Ordering::Relaxed),
            entries_queued: self.entries_queued.load(Ordering::Relaxed),
            entries_done: self.entries_done.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}

/// Sample the tracker every `interval` until aborted.
pub(crate) async fn report(
    tracker: Arc<ProgressTracker>,
    progress_tx: Option<mpsc::Sender<Progress>>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    // first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let snapshot = tracker.snapshot();
        tracing::info!(
            percent = format_args!("{:.0}", snapshot.percent()),
            eta_secs = snapshot.eta().map(|d| d.as_secs()),
            sources = snapshot.sources_done,
            entries = snapshot.entries_done,
            "Cycle progress"
        );
        if let Some(tx) = &progress_tx {
            if tx.send(snapshot).await.is_err() {
                tracing::debug!("Progress receiver dropped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(done: usize, total: usize, elapsed_secs: u64) -> Progress {
        Progress {
            sources_total: total,
            sources_done: done,
            entries_queued: 0,
            entries_done: 0,
            elapsed: Duration::from_secs(elapsed_secs),
        }
    }

    #[test]
    fn test_percent_and_eta() {
        let p = progress(1, 4, 10);
        assert_eq!(p.percent(), 25.0);
        assert_eq!(p.eta(), Some(Duration::from_secs(30)));
        assert!(!p.is_finished());
    }

    #[test]
    fn test_nothing_done_has_no_eta() {
        assert_eq!(progress(0, 4, 10).eta(), None);
        assert_eq!(progress(0, 0, 0).percent(), 100.0);
    }

    #[test]
    fn test_tracker_counts_entries() {
        let tracker = ProgressTracker::new(2);
        tracker.source_done();
        tracker.entry_queued();
        tracker.entry_queued();
        tracker.entry_done();
        let snap = tracker.snapshot();
        assert_eq!(snap.sources_done, 1);
        assert_eq!(snap.entries_queued, 2);
        assert_eq!(snap.entries_done, 1);
        assert_eq!(snap.percent(), 50.0);
    }
}
