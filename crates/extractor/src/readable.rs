use scraper::{ElementRef, Html};

use crate::html;
use crate::TierExtract;

/// Containers checked before falling back to scored candidates.
const CONTAINER_SELECTORS: [&str; 6] = [
    "article",
    "main",
    "[role='main']",
    "#content",
    ".post-content",
    ".article-body",
];

/// Anything shorter than this is navigation or boilerplate, not a body.
const MIN_CONTAINER_CHARS: usize = 250;

/// Readability-grade tier: locate the main content container, harvest its
/// block elements, and pull title/author/published-at from page metadata.
pub(crate) fn extract(document: &Html) -> Option<TierExtract> {
    let container = find_container(document)?;
    let text = harvest_blocks(container)?;

    Some(TierExtract {
        title: html::page_title(document),
        author: html::meta_author(document),
        published_raw: html::meta_published(document),
        text,
        method: "readable",
        confidence: 0.7,
        warnings: Vec::new(),
    })
}

fn find_container<'a>(document: &'a Html) -> Option<ElementRef<'a>> {
    for sel_str in CONTAINER_SELECTORS {
        let Some(sel) = html::selector(sel_str) else {
            continue;
        };
        if let Some(el) = document.select(&sel).next() {
            if html::block_text(el).chars().count() >= MIN_CONTAINER_CHARS {
                return Some(el);
            }
        }
    }

    // No semantic container: score generic blocks by text mass, discounting
    // link-heavy ones.
    let sel = html::selector("div, section")?;
    let mut best: Option<(f64, ElementRef)> = None;
    for el in document.select(&sel) {
        let len = html::block_text(el).chars().count();
        if len < MIN_CONTAINER_CHARS {
            continue;
        }
        let score = len as f64 * (1.0 - html::link_density(el));
        if best.as_ref().map(|(top, _)| score > *top).unwrap_or(true) {
            best = Some((score, el));
        }
    }
    best.map(|(_, el)| el)
}

/// Join the container's block-level elements with blank lines so the
/// sectioniser sees paragraph boundaries.
fn harvest_blocks(container: ElementRef) -> Option<String> {
    let sel = html::selector("p, h1, h2, h3, h4, li, blockquote, pre")?;
    let blocks: Vec<String> = container
        .select(&sel)
        .map(html::block_text)
        .filter(|t| !t.is_empty())
        .collect();

    let text = if blocks.is_empty() {
        html::block_text(container)
    } else {
        blocks.join("\n\n")
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
