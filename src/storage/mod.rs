mod articles;
mod dedup;
mod keywords;
mod schema;
mod sources;
mod types;

pub use dedup::{DedupStore, LinkClaim};
pub use schema::Database;
pub use types::{
    Article, DatabaseError, Image, InsertOutcome, Keyword, Media, NewArticle, NewImage,
    RankCandidate, Source,
};
