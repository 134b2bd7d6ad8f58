//! Representative image selection.
//!
//! Candidate image URLs are scraped from quoted attribute values in the page,
//! each candidate is downloaded with a short timeout and its dimensions are
//! decoded. The largest by area wins.

use futures::stream::{self, StreamExt};
use regex::Regex;
use std::io::Cursor;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

use crate::feed::Fetcher;

const CONCURRENT_IMAGE_FETCHES: usize = 4;

/// A downloaded image with its decoded dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureCandidate {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

impl PictureCandidate {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Storage key of the image: its absolute URL without the fragment.
    /// Images that share a basename on different paths stay distinct.
    pub fn filename(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut url) => {
                url.set_fragment(None);
                url.to_string()
            }
            Err(_) => self.url.clone(),
        }
    }
}

fn image_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)"([^"\s<>]+\.(?:jpe?g|png|gif|webp)(?:\?[^"\s<>]*)?)""#)
            .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

/// Image URLs referenced by the page, resolved against `base`, in document
/// order and without duplicates.
pub fn image_candidates(html: &str, base: &str, limit: usize) -> Vec<String> {
    let base = Url::parse(base).ok();
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for caps in image_url_regex().captures_iter(html) {
        if out.len() >= limit {
            break;
        }
        let raw = caps[1].replace("&amp;", "&");
        let resolved = match &base {
            Some(base) => match base.join(&raw) {
                Ok(url) => url.to_string(),
                Err(_) => continue,
            },
            None => raw,
        };
        if seen.insert(resolved.clone()) {
            out.push(resolved);
        }
    }
    out
}

/// First candidate with the strictly largest area.
pub fn pick_largest(candidates: impl IntoIterator<Item = PictureCandidate>) -> Option<PictureCandidate> {
    let mut best: Option<PictureCandidate> = None;
    for candidate in candidates {
        match &best {
            Some(current) if candidate.area() <= current.area() => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// Width and height of an encoded image, if it can be decoded.
pub fn decode_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Download every candidate and return the largest decodable one.
///
/// Failed downloads and undecodable bodies are skipped.
pub async fn find_picture(
    fetcher: &Fetcher,
    html: &str,
    page_url: &str,
    max_candidates: usize,
    timeout: Duration,
) -> Option<PictureCandidate> {
    let urls = image_candidates(html, page_url, max_candidates);
    if urls.is_empty() {
        return None;
    }

    let measured: Vec<Option<PictureCandidate>> = stream::iter(urls)
        .map(|url| async move {
            let doc = match fetcher.fetch(&url, timeout).await {
                Ok(doc) if doc.is_success() => doc,
                Ok(doc) => {
                    tracing::debug!(url = %url, status = doc.status, "Image candidate unavailable");
                    return None;
                }
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "Image candidate fetch failed");
                    return None;
                }
            };
            let (width, height) = decode_dimensions(&doc.body)?;
            Some(PictureCandidate { url, width, height })
        })
        .buffered(CONCURRENT_IMAGE_FETCHES)
        .collect()
        .await;

    pick_largest(measured.into_iter().flatten())
}
