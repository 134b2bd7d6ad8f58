//! Feed reader core: adaptive polling, a concurrent fetch/enrich pipeline
//! and relevance ranking of unread articles.

pub mod config;
pub mod enrich;
pub mod feed;
pub mod pipeline;
pub mod ranking;
pub mod scheduler;
pub mod storage;
