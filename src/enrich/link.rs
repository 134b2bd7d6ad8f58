use url::Url;

use crate::feed::FeedEntry;

/// Canonical form of an entry's link, used as the article's identity.
///
/// Relative links are resolved against the feed URL and fragments are
/// dropped. Entries without a link fall back to their id when it looks like
/// a URL. A link that cannot be parsed is kept as its trimmed raw string.
pub fn canonical_link(entry: &FeedEntry, feed_url: &str) -> Option<String> {
    let raw = entry
        .link
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .or_else(|| {
            let id = entry.id.trim();
            (id.starts_with("http://") || id.starts_with("https://")).then_some(id)
        })?;

    let parsed = Url::parse(raw).or_else(|e| match e {
        url::ParseError::RelativeUrlWithoutBase => Url::parse(feed_url)?.join(raw),
        other => Err(other),
    });

    match parsed {
        Ok(mut url) => {
            url.set_fragment(None);
            Some(url.to_string())
        }
        Err(e) => {
            tracing::debug!(link = %raw, error = %e, "Link not parseable, keeping raw form");
            Some(raw.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(link: Option<&str>, id: &str) -> FeedEntry {
        FeedEntry {
            link: link.map(String::from),
            id: id.to_string(),
            title: String::new(),
            published: None,
            summary: None,
        }
    }

    const FEED: &str = "https://example.com/feeds/rss.xml";

    #[test]
    fn test_fragment_dropped() {
        assert_eq!(
            canonical_link(&entry(Some("https://Example.com/a#comments"), ""), FEED).as_deref(),
            Some("https://example.com/a")
        );
    }

    #[test]
    fn test_relative_link_resolved() {
        assert_eq!(
            canonical_link(&entry(Some("a"), ""), FEED).as_deref(),
            Some("https://example.com/feeds/a")
        );
        assert_eq!(
            canonical_link(&entry(Some("/news/b"), ""), FEED).as_deref(),
            Some("https://example.com/news/b")
        );
    }

    #[test]
    fn test_id_used_when_link_missing() {
        assert_eq!(
            canonical_link(&entry(None, "https://example.com/post/1"), FEED).as_deref(),
            Some("https://example.com/post/1")
        );
        assert_eq!(canonical_link(&entry(None, "urn:uuid:1234"), FEED), None);
        assert_eq!(canonical_link(&entry(Some("  "), ""), FEED), None);
    }

    #[test]
    fn test_unparseable_kept_raw() {
        assert_eq!(
            canonical_link(&entry(Some("http://[bad"), ""), FEED).as_deref(),
            Some("http://[bad")
        );
    }
}
