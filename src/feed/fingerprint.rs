//! Content fingerprints for change detection.
//!
//! A fingerprint is only ever compared for equality with the value stored for
//! the same source on the previous poll. It carries no security meaning.

use sha2::{Digest, Sha256};
use std::future::Future;
use std::time::Duration;

/// Hex digest of a document's raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `stored` (the value persisted for the source) equals this one.
    pub fn matches(&self, stored: Option<&str>) -> bool {
        stored == Some(self.0.as_str())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    Fingerprint(format!("{:x}", Sha256::digest(bytes)))
}

/// Read a document and fingerprint it, retrying failed reads.
///
/// `read` is invoked up to `attempts` times with `delay` between failures.
/// Returns `None` once all attempts are exhausted; callers treat that as
/// "unchanged" for the current cycle.
pub async fn fingerprint_with_retry<F, Fut, T, E>(
    attempts: u32,
    delay: Duration,
    mut read: F,
) -> Option<(T, Fingerprint)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match read().await {
            Ok(doc) => {
                let fp = fingerprint(doc.as_ref());
                return Some((doc, fp));
            }
            Err(e) => {
                tracing::debug!(attempt, attempts, error = %e, "Fingerprint read failed");
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    None
}
