//! Relevance ranking of unread articles.
//!
//! ```text
//! score = recency_scale * date
//!       - read_penalty * |times_read|
//!       - skip_penalty * |skip_count|
//!       + sum(click_count - 1) over the article's keywords
//! ```
//!
//! The recency term is scaled down so that it only separates articles whose
//! keyword feedback is equal.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::storage::{Article, Database, RankCandidate};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RankingWeights {
    pub recency_scale: f64,
    pub read_penalty: f64,
    pub skip_penalty: f64,
    /// Over-fetch multiple applied to the page size before scoring
    pub radius: u32,
    /// Articles skipped more often than this are not candidates
    pub max_skips: i64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            recency_scale: 1e-10,
            read_penalty: 9.0,
            skip_penalty: 3.0,
            radius: 3,
            max_skips: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedArticle {
    pub score: f64,
    #[serde(flatten)]
    pub article: Article,
}

pub fn score(candidate: &RankCandidate, weights: &RankingWeights) -> f64 {
    let article = &candidate.article;
    let feedback: i64 = candidate.keyword_clicks.iter().map(|clicks| clicks - 1).sum();

    weights.recency_scale * article.date as f64
        - weights.read_penalty * article.times_read.unsigned_abs() as f64
        - weights.skip_penalty * article.skip_count.unsigned_abs() as f64
        + feedback as f64
}

/// Score `candidates` and keep the best `limit`, highest first.
///
/// Equal scores keep their input order.
pub fn rank(
    candidates: Vec<RankCandidate>,
    limit: usize,
    weights: &RankingWeights,
) -> Vec<RankedArticle> {
    let mut scored: Vec<RankedArticle> = candidates
        .into_iter()
        .map(|c| RankedArticle {
            score: score(&c, weights),
            article: c.article,
        })
        .collect();
    // sort_by is stable
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(limit);
    scored
}

/// The `page`-th page of `limit` unread articles by score.
///
/// Fetches a window of `radius * limit` newest candidates and ranks within
/// it, since the best-scoring articles are not necessarily the newest.
pub async fn top_unread(
    db: &Database,
    page: u32,
    limit: u32,
    weights: &RankingWeights,
) -> Result<Vec<RankedArticle>> {
    let radius = i64::from(weights.radius.max(1));
    let window = i64::from(limit) * radius;
    let offset = i64::from(page) * window;

    let candidates = db
        .get_rank_candidates(offset, window, weights.max_skips)
        .await?;
    tracing::debug!(page, limit, candidates = candidates.len(), "Ranking unread articles");
    Ok(rank(candidates, limit as usize, weights))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewArticle, Source};
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn article(id: i64, date: i64, times_read: i64, skip_count: i64) -> Article {
        Article {
            id,
            source_id: 1,
            link: format!("https://example.com/{id}"),
            title: Arc::from(format!("Article {id}")),
            content: Arc::from(""),
            date,
            image: None,
            media: None,
            times_read,
            skip_count,
            last_read: None,
        }
    }

    fn candidate(id: i64, date: i64, clicks: &[i64]) -> RankCandidate {
        RankCandidate {
            article: article(id, date, 0, 0),
            keyword_clicks: clicks.to_vec(),
        }
    }

    fn ids(ranked: &[RankedArticle]) -> Vec<i64> {
        ranked.iter().map(|r| r.article.id).collect()
    }

    #[test]
    fn test_keyword_feedback_outweighs_recency() {
        let weights = RankingWeights::default();
        let ranked = rank(
            vec![
                candidate(1, 1_700_000_000, &[0, 0]),
                candidate(2, 1_600_000_000, &[5, 0]),
            ],
            10,
            &weights,
        );
        assert_eq!(ids(&ranked), vec![2, 1]);
    }

    #[test]
    fn test_read_and_skip_penalties() {
        let weights = RankingWeights::default();
        let fresh = candidate(1, 0, &[1]);
        let mut read = candidate(2, 0, &[1]);
        read.article.times_read = 1;
        let mut skipped = candidate(3, 0, &[1]);
        skipped.article.skip_count = 2;

        assert_eq!(score(&fresh, &weights), 0.0);
        assert_eq!(score(&read, &weights), -9.0);
        assert_eq!(score(&skipped, &weights), -6.0);
        assert_eq!(ids(&rank(vec![read, skipped, fresh], 3, &weights)), vec![1, 3, 2]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let weights = RankingWeights {
            recency_scale: 0.0,
            ..RankingWeights::default()
        };
        let ranked = rank(
            vec![candidate(7, 3, &[2]), candidate(3, 2, &[2]), candidate(9, 1, &[2])],
            2,
            &weights,
        );
        assert_eq!(ids(&ranked), vec![7, 3]);
    }

    proptest! {
        #[test]
        fn prop_rank_is_sorted_and_bounded(
            clicks in prop::collection::vec(prop::collection::vec(-5i64..20, 0..4), 0..30),
            limit in 0usize..40,
        ) {
            let weights = RankingWeights::default();
            let candidates: Vec<RankCandidate> = clicks
                .iter()
                .enumerate()
                .map(|(i, c)| candidate(i as i64, 1_700_000_000 - i as i64, c))
                .collect();
            let n = candidates.len();
            let ranked = rank(candidates, limit, &weights);
            prop_assert_eq!(ranked.len(), n.min(limit));
            for pair in ranked.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }
    }

    async fn seed(db: &Database) -> Source {
        db.subscribe("https://example.com/rss").await.unwrap();
        db.get_source("https://example.com/rss").await.unwrap().unwrap()
    }

    fn new_article(source: &Source, n: i64, title: &str) -> NewArticle {
        NewArticle {
            source_id: source.id,
            link: format!("https://example.com/{n}"),
            title: title.to_string(),
            content: String::new(),
            date: 1_700_000_000 + n,
            keywords: title.split(' ').map(str::to_lowercase).collect::<BTreeSet<_>>(),
            image: None,
            media: None,
        }
    }

    #[tokio::test]
    async fn test_top_unread_promotes_voted_keyword() {
        let db = Database::open(":memory:").await.unwrap();
        let source = seed(&db).await;
        for n in 0..6 {
            let title = if n == 0 { "mars rover" } else { "weather report" };
            db.insert_article(&new_article(&source, n, title)).await.unwrap();
        }
        db.vote_keyword_by_word("mars", 3).await.unwrap();

        let top = top_unread(&db, 0, 2, &RankingWeights::default()).await.unwrap();
        assert_eq!(top.len(), 2);
        // oldest article wins thanks to the vote; the rest fall back to recency
        assert_eq!(top[0].article.link, "https://example.com/0");
        assert_eq!(top[1].article.link, "https://example.com/5");
    }

    #[tokio::test]
    async fn test_top_unread_excludes_read_and_overskipped() {
        let db = Database::open(":memory:").await.unwrap();
        let source = seed(&db).await;
        let mut ids = Vec::new();
        for n in 0..3 {
            let outcome = db.insert_article(&new_article(&source, n, "news")).await.unwrap();
            match outcome {
                crate::storage::InsertOutcome::Inserted { article_id, .. } => ids.push(article_id),
                crate::storage::InsertOutcome::Duplicate => panic!("unexpected duplicate"),
            }
        }
        db.mark_read(ids[0]).await.unwrap();
        for _ in 0..6 {
            db.skip_article(ids[1]).await.unwrap();
        }

        let top = top_unread(&db, 0, 10, &RankingWeights::default()).await.unwrap();
        let links: Vec<&str> = top.iter().map(|r| r.article.link.as_str()).collect();
        assert_eq!(links, vec!["https://example.com/2"]);
    }
}
