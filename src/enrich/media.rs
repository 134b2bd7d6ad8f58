use regex::Regex;
use std::sync::OnceLock;

struct EmbedPattern {
    regex: Regex,
    embed_prefix: &'static str,
}

fn patterns() -> &'static [EmbedPattern] {
    static PATTERNS: OnceLock<Vec<EmbedPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                r"(?i)(?:youtube(?:-nocookie)?\.com/(?:watch\?(?:[^\s&]*&)*v=|embed/|v/)|youtu\.be/)([\w-]{6,})",
                "https://www.youtube.com/embed/",
            ),
            (
                r"(?i)(?:player\.)?vimeo\.com/(?:video/)?(\d+)",
                "https://player.vimeo.com/video/",
            ),
        ]
        .into_iter()
        .map(|(pattern, embed_prefix)| EmbedPattern {
            regex: Regex::new(pattern).unwrap_or_else(|e| unreachable!("static regex: {e}")),
            embed_prefix,
        })
        .collect()
    })
}

/// Find an embeddable video referenced by the page.
///
/// Returns a canonical embed URL, so the same video found on several pages
/// always yields the same string.
pub fn find_media(html: &str) -> Option<String> {
    patterns().iter().find_map(|p| {
        p.regex
            .captures(html)
            .map(|caps| format!("{}{}", p.embed_prefix, &caps[1]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_watch_link() {
        let html = r#"<a href="https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10">video</a>"#;
        assert_eq!(
            find_media(html).as_deref(),
            Some("https://www.youtube.com/embed/dQw4w9WgXcQ")
        );
    }

    #[test]
    fn test_youtube_embed_and_short_link_agree() {
        let embed = r#"<iframe src="https://www.youtube.com/embed/dQw4w9WgXcQ"></iframe>"#;
        let short = r#"<a href="https://youtu.be/dQw4w9WgXcQ">x</a>"#;
        assert_eq!(find_media(embed), find_media(short));
        assert!(find_media(embed).is_some());
    }

    #[test]
    fn test_vimeo() {
        let html = r#"<iframe src="https://player.vimeo.com/video/76979871"></iframe>"#;
        assert_eq!(
            find_media(html).as_deref(),
            Some("https://player.vimeo.com/video/76979871")
        );
    }

    #[test]
    fn test_no_media() {
        assert_eq!(find_media("<p>plain text</p>"), None);
    }
}
