use scraper::Html;

use crate::html;
use crate::TierExtract;

/// Paragraphs below this length are treated as chrome, not content.
const MIN_PARAGRAPH_CHARS: usize = 60;

/// Content-density tier: keep every substantial `<p>` in document order.
/// Cruder than the readable tier, so it only supplies a short title.
pub(crate) fn extract(document: &Html) -> Option<TierExtract> {
    let sel = html::selector("p")?;
    let paragraphs: Vec<String> = document
        .select(&sel)
        .map(html::block_text)
        .filter(|t| t.chars().count() >= MIN_PARAGRAPH_CHARS)
        .collect();

    if paragraphs.is_empty() {
        return None;
    }

    Some(TierExtract {
        title: html::first_text(document, "title"),
        author: None,
        published_raw: None,
        text: paragraphs.join("\n\n"),
        method: "density",
        confidence: 0.5,
        warnings: Vec::new(),
    })
}
