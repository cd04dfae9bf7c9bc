use scraper::{ElementRef, Html, Node, Selector};

use crate::TierExtract;

pub(crate) fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

/// All descendant text of an element, whitespace-collapsed.
pub(crate) fn block_text(el: ElementRef) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn first_text(document: &Html, sel: &str) -> Option<String> {
    let sel = selector(sel)?;
    let el = document.select(&sel).next()?;
    let text = block_text(el);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn meta_content(document: &Html, sel_str: &str) -> Option<String> {
    let sel = selector(sel_str)?;
    document
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Prefer the Open Graph title over `<title>`.
pub(crate) fn page_title(document: &Html) -> Option<String> {
    meta_content(document, "meta[property='og:title']").or_else(|| first_text(document, "title"))
}

pub(crate) fn meta_author(document: &Html) -> Option<String> {
    meta_content(document, "meta[name='author']")
        .or_else(|| meta_content(document, "meta[property='article:author']"))
}

pub(crate) fn meta_published(document: &Html) -> Option<String> {
    meta_content(document, "meta[property='article:published_time']")
        .or_else(|| meta_content(document, "meta[name='date']"))
        .or_else(|| {
            let sel = selector("time[datetime]")?;
            document
                .select(&sel)
                .next()
                .and_then(|el| el.value().attr("datetime"))
                .map(|s| s.trim().to_string())
        })
}

/// Share of an element's text that sits inside anchors. High values mean
/// navigation chrome rather than content.
pub(crate) fn link_density(el: ElementRef) -> f64 {
    let total = block_text(el).chars().count();
    if total == 0 {
        return 0.0;
    }
    let Some(sel) = selector("a") else {
        return 0.0;
    };
    let linked: usize = el
        .select(&sel)
        .map(|a| block_text(a).chars().count())
        .sum();
    linked as f64 / total as f64
}

/// Last-resort tier: drop script/style/noscript subtrees and keep every
/// remaining text node, one line each.
pub(crate) fn strip_extract(document: &Html) -> TierExtract {
    let mut lines: Vec<String> = Vec::new();
    for node in document.tree.nodes() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let inside_stripped_tag = node.ancestors().any(|ancestor| {
            matches!(
                ancestor.value(),
                Node::Element(el) if matches!(el.name(), "script" | "style" | "noscript")
            )
        });
        if inside_stripped_tag {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.split_whitespace().collect::<Vec<_>>().join(" "));
        }
    }

    TierExtract {
        title: first_text(document, "title"),
        author: None,
        published_raw: None,
        text: lines.join("\n"),
        method: "strip",
        confidence: 0.4,
        warnings: vec!["fallback_extractor".to_string()],
    }
}
