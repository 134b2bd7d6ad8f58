//! Boilerplate removal for article pages.
//!
//! The page is cut into text blocks at block-level tags. Each block is first
//! classified on its own (length, link density, stopword density) and then
//! reclassified from its neighbours, so short lines inside an article body
//! survive while navigation and footers are dropped. Only blocks that end up
//! `Good` are emitted.

use scraper::node::Node;
use scraper::{ElementRef, Html};
use std::collections::HashSet;
use thiserror::Error;

use super::language::{tokenize, Language};

const LENGTH_LOW: usize = 70;
const LENGTH_HIGH: usize = 200;
const STOPWORDS_LOW: f64 = 0.30;
const STOPWORDS_HIGH: f64 = 0.32;
const MAX_LINK_DENSITY: f64 = 0.2;
const MAX_HEADING_DISTANCE: usize = 200;

/// Subtrees that never contain article text.
const SKIPPED_TAGS: &[&str] = &[
    "head", "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "iframe",
    "svg", "button", "select", "textarea", "template", "object", "embed",
];

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "blockquote", "body", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "li", "main", "ol", "p", "pre", "section",
    "table", "td", "th", "tr", "ul",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("Page contains no text blocks")]
    NoBlocks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    Good,
    NearGood,
    Short,
    Bad,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub text: String,
    /// Characters that sit inside `<a>` elements
    pub link_chars: usize,
    pub is_heading: bool,
}

impl TextBlock {
    fn len(&self) -> usize {
        self.text.chars().count()
    }

    fn link_density(&self) -> f64 {
        self.link_chars as f64 / self.len().max(1) as f64
    }

    fn stopword_density(&self, stopwords: &HashSet<&'static str>) -> f64 {
        let mut words = 0usize;
        let mut hits = 0usize;
        for token in tokenize(&self.text) {
            words += 1;
            if stopwords.contains(token.as_str()) {
                hits += 1;
            }
        }
        if words == 0 {
            0.0
        } else {
            hits as f64 / words as f64
        }
    }
}

/// Strip boilerplate from an HTML page, keeping the main text.
///
/// Headings are rendered as `text\n----\n` and paragraphs as `text\n\n`.
/// Returns [`ExtractError::NoBlocks`] when the page has no text at all; an
/// empty string means text was found but all of it was boilerplate.
pub fn remove_boilerplate(html: &str, language: Language) -> Result<String, ExtractError> {
    let blocks = segment(html);
    if blocks.is_empty() {
        return Err(ExtractError::NoBlocks);
    }

    let classes = classify(&blocks, language.stopwords());

    let mut out = String::new();
    for (block, class) in blocks.iter().zip(&classes) {
        if *class != BlockClass::Good {
            continue;
        }
        out.push_str(&block.text);
        if block.is_heading {
            out.push_str("\n----\n");
        } else {
            out.push_str("\n\n");
        }
    }
    Ok(out)
}

/// Visible text of an HTML fragment with whitespace collapsed.
pub fn plain_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Segmentation
// ============================================================================

pub fn segment(html: &str) -> Vec<TextBlock> {
    let document = Html::parse_document(html);
    let mut segmenter = Segmenter::default();
    segmenter.walk(document.root_element(), false);
    segmenter.flush();
    segmenter.blocks
}

#[derive(Default)]
struct Segmenter {
    blocks: Vec<TextBlock>,
    current: String,
    link_chars: usize,
    heading: bool,
}

impl Segmenter {
    fn walk(&mut self, element: ElementRef<'_>, in_link: bool) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => {
                    let text: &str = text;
                    if in_link {
                        self.link_chars += text.split_whitespace().map(|w| w.chars().count()).sum::<usize>();
                    }
                    self.current.push_str(text);
                }
                Node::Element(el) => {
                    let name = el.name();
                    if SKIPPED_TAGS.contains(&name) {
                        continue;
                    }
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    let is_block = BLOCK_TAGS.contains(&name);
                    if is_block {
                        self.flush();
                    }
                    if matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6") {
                        self.heading = true;
                    }
                    self.walk(child_el, in_link || name == "a");
                    if is_block {
                        self.flush();
                    } else {
                        // inline elements still separate words
                        self.current.push(' ');
                    }
                }
                _ => {}
            }
        }
    }

    fn flush(&mut self) {
        let text = self.current.split_whitespace().collect::<Vec<_>>().join(" ");
        if !text.is_empty() {
            let link_chars = self.link_chars.min(text.chars().count());
            self.blocks.push(TextBlock {
                text,
                link_chars,
                is_heading: self.heading,
            });
        }
        self.current.clear();
        self.link_chars = 0;
        self.heading = false;
    }
}

// ============================================================================
// Classification
// ============================================================================

pub fn classify(blocks: &[TextBlock], stopwords: &HashSet<&'static str>) -> Vec<BlockClass> {
    let mut classes: Vec<BlockClass> = blocks
        .iter()
        .map(|b| classify_block(b, stopwords))
        .collect();

    promote_headings(blocks, &mut classes);
    resolve_short(&mut classes);
    resolve_near_good(&mut classes);
    classes
}

fn classify_block(block: &TextBlock, stopwords: &HashSet<&'static str>) -> BlockClass {
    let len = block.len();
    let lower = block.text.to_lowercase();

    if block.link_density() > MAX_LINK_DENSITY {
        return BlockClass::Bad;
    }
    if lower.contains('©') || lower.contains("copyright") {
        return BlockClass::Bad;
    }
    if len < LENGTH_LOW {
        return if block.link_chars > 0 {
            BlockClass::Bad
        } else {
            BlockClass::Short
        };
    }

    let density = block.stopword_density(stopwords);
    if density >= STOPWORDS_HIGH {
        if len > LENGTH_HIGH {
            BlockClass::Good
        } else {
            BlockClass::NearGood
        }
    } else if density >= STOPWORDS_LOW {
        BlockClass::NearGood
    } else {
        BlockClass::Bad
    }
}

/// Headings shortly before good text become near-good.
fn promote_headings(blocks: &[TextBlock], classes: &mut [BlockClass]) {
    for i in 0..blocks.len() {
        if !blocks[i].is_heading || classes[i] == BlockClass::Good {
            continue;
        }
        if classes[i] == BlockClass::Bad && blocks[i].link_density() > MAX_LINK_DENSITY {
            continue;
        }
        let mut distance = 0usize;
        for j in (i + 1)..blocks.len() {
            if classes[j] == BlockClass::Good {
                classes[i] = BlockClass::NearGood;
                break;
            }
            distance += blocks[j].len();
            if distance > MAX_HEADING_DISTANCE {
                break;
            }
        }
    }
}

fn neighbour(
    classes: &[BlockClass],
    from: usize,
    forward: bool,
    ignore: &[BlockClass],
) -> BlockClass {
    let found = if forward {
        classes[from + 1..].iter().find(|c| !ignore.contains(c))
    } else {
        classes[..from].iter().rev().find(|c| !ignore.contains(c))
    };
    found.copied().unwrap_or(BlockClass::Bad)
}

fn resolve_short(classes: &mut [BlockClass]) {
    let original = classes.to_vec();
    for i in 0..original.len() {
        if original[i] != BlockClass::Short {
            continue;
        }
        let prev = neighbour(&original, i, false, &[BlockClass::Short, BlockClass::NearGood]);
        let next = neighbour(&original, i, true, &[BlockClass::Short, BlockClass::NearGood]);
        classes[i] = match (prev, next) {
            (BlockClass::Good, BlockClass::Good) => BlockClass::Good,
            (BlockClass::Bad, BlockClass::Bad) => {
                // a near-good block right next to it may still pull it in
                let prev_near = neighbour(&original, i, false, &[BlockClass::Short]);
                let next_near = neighbour(&original, i, true, &[BlockClass::Short]);
                if prev_near == BlockClass::NearGood || next_near == BlockClass::NearGood {
                    BlockClass::NearGood
                } else {
                    BlockClass::Bad
                }
            }
            _ => BlockClass::NearGood,
        };
    }
}

fn resolve_near_good(classes: &mut [BlockClass]) {
    let original = classes.to_vec();
    for i in 0..original.len() {
        if original[i] != BlockClass::NearGood {
            continue;
        }
        let prev = neighbour(&original, i, false, &[BlockClass::NearGood, BlockClass::Short]);
        let next = neighbour(&original, i, true, &[BlockClass::NearGood, BlockClass::Short]);
        classes[i] = if prev == BlockClass::Bad && next == BlockClass::Bad {
            BlockClass::Bad
        } else {
            BlockClass::Good
        };
    }
}
