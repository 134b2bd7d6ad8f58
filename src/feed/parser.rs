use feed_rs::parser;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Feed parse error: {0}")]
pub struct ParseError(#[from] parser::ParseFeedError);

/// The parts of a feed document the pipeline uses.
#[derive(Debug, Clone)]
pub struct FeedDocument {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

impl FeedDocument {
    /// Display title, falling back to the feed URL.
    pub fn title_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(fallback)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Entry link as published (not yet canonicalized)
    pub link: Option<String>,
    /// Entry id/guid, empty if absent
    pub id: String,
    pub title: String,
    pub published: Option<i64>,
    pub summary: Option<String>,
}

pub fn parse_feed(bytes: &[u8]) -> Result<FeedDocument, ParseError> {
    let feed = parser::parse(bytes)?;

    let title = feed.title.map(|t| t.content);
    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .filter(|href| !href.is_empty());
            let published = entry.published.or(entry.updated).map(|dt| dt.timestamp());
            let summary = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));
            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .unwrap_or_default();

            FeedEntry {
                link,
                id: entry.id,
                title,
                published,
                summary,
            }
        })
        .collect();

    Ok(FeedDocument { title, entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Space News</title>
    <item>
        <title>Mars Rover Update</title>
        <link>https://example.com/a</link>
        <guid isPermaLink="false">a-1</guid>
        <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
        <description>Short summary</description>
    </item>
    <item><guid isPermaLink="false">no-link</guid></item>
</channel></rss>"#;

    #[test]
    fn test_parse_rss() {
        let doc = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(doc.title.as_deref(), Some("Space News"));
        assert_eq!(doc.entries.len(), 2);

        let first = &doc.entries[0];
        assert_eq!(first.link.as_deref(), Some("https://example.com/a"));
        assert_eq!(first.title, "Mars Rover Update");
        assert_eq!(first.published, Some(1704067200));
        assert_eq!(first.summary.as_deref(), Some("Short summary"));

        let second = &doc.entries[1];
        assert!(second.link.is_none());
        assert_eq!(second.title, "");
    }

    #[test]
    fn test_title_falls_back_to_url() {
        let doc = parse_feed(
            br#"<?xml version="1.0"?><rss version="2.0"><channel></channel></rss>"#,
        )
        .unwrap();
        assert_eq!(doc.title_or("https://example.com/rss"), "https://example.com/rss");
    }

    #[test]
    fn test_parse_atom() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Feed</title>
  <id>urn:feed</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <title>Entry One</title>
    <id>urn:one</id>
    <link href="https://example.com/one"/>
    <updated>2024-01-02T00:00:00Z</updated>
  </entry>
</feed>"#;
        let doc = parse_feed(atom.as_bytes()).unwrap();
        assert_eq!(doc.title_or(""), "Atom Feed");
        assert_eq!(doc.entries[0].link.as_deref(), Some("https://example.com/one"));
        assert_eq!(doc.entries[0].published, Some(1704153600));
    }

    #[test]
    fn test_malformed_feed_is_error() {
        assert!(parse_feed(b"<not valid xml").is_err());
    }
}
