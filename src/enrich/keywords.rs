use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w@#]+").unwrap_or_else(|e| unreachable!("static regex: {e}")))
}

/// Lowercased title words. `@` and `#` stay attached to their word so
/// handles and hashtags are kept whole.
pub fn title_keywords(title: &str) -> BTreeSet<String> {
    separator()
        .split(title)
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}
