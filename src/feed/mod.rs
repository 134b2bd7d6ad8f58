//! Feed retrieval: HTTP fetching, change detection and parsing.
//!
//! - [`fetcher`] - HTTP retrieval with per-request timeouts, scheme fallback
//!   and a body size limit
//! - [`fingerprint`] - cheap digests used to skip unchanged feed documents
//! - [`parser`] - RSS/Atom parsing via `feed-rs`

mod fetcher;
mod fingerprint;
mod parser;

pub use fetcher::{normalize_url, FetchError, FetchPolicy, FetchedDocument, Fetcher};
pub use fingerprint::{fingerprint, fingerprint_with_retry, Fingerprint};
pub use parser::{parse_feed, FeedDocument, FeedEntry, ParseError};
