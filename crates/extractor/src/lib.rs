mod density;
mod html;
mod readable;
pub mod sectionise;

use chrono::{DateTime, NaiveDate, Utc};
use scraper::Html;
use tracing::debug;

use contextd_core::Extracted;

/// One tier's raw output before shared post-processing.
pub(crate) struct TierExtract {
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_raw: Option<String>,
    pub text: String,
    pub method: &'static str,
    pub confidence: f64,
    pub warnings: Vec<String>,
}

/// HTML → readable text plus title/author/published-at metadata.
///
/// Tiered cascade: container scoring ("readable", 0.7), paragraph density
/// ("density", 0.5), then a tag-strip fallback ("strip", 0.4, flagged with
/// `fallback_extractor`). The first tier producing non-empty text wins.
/// Output text is capped at `max_chars` with a `text_truncated` warning.
pub fn extract_readable_text(html: &str, url: &str, max_chars: usize) -> Extracted {
    let document = Html::parse_document(html);

    let tier = readable::extract(&document)
        .or_else(|| density::extract(&document))
        .unwrap_or_else(|| html::strip_extract(&document));

    debug!(url, method = tier.method, chars = tier.text.len(), "extracted");

    let (text, was_truncated) = trim_chars(&tier.text, max_chars);
    let mut warnings = tier.warnings;
    if was_truncated {
        warnings.push("text_truncated".to_string());
    }

    let published_at = tier.published_raw.as_deref().and_then(parse_published_at);

    Extracted {
        title: tier.title,
        author: tier.author,
        published_at,
        text,
        method: tier.method,
        confidence: tier.confidence,
        warnings,
    }
}

/// Truncate to a character count (not bytes), trimming trailing whitespace
/// off the cut. Returns whether truncation happened.
fn trim_chars(text: &str, max_chars: usize) -> (String, bool) {
    if max_chars == 0 {
        return (String::new(), !text.is_empty());
    }
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (text[..byte_idx].trim_end().to_string(), true),
        None => (text.to_string(), false),
    }
}

/// Parse an ISO-8601 timestamp out of page metadata. A trailing `Z` is
/// normalized to `+00:00` first; bare dates are accepted at midnight UTC.
fn parse_published_at(raw: &str) -> Option<DateTime<Utc>> {
    let cleaned = raw.trim();
    let cleaned = match cleaned.strip_suffix('Z') {
        Some(stripped) => format!("{stripped}+00:00"),
        None => cleaned.to_string(),
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&cleaned) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(&cleaned, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG_PARA: &str = "The supply chain for advanced accelerators has tightened over the \
        past year, with lead times stretching from eight weeks to more than forty for the \
        largest buyers, and second-tier cloud providers report being pushed to the back of \
        the queue while hyperscalers absorb most of the available capacity.";

    #[test]
    fn readable_tier_wins_for_article_markup() {
        let html = format!(
            r#"<html><head>
                 <title>Fallback title</title>
                 <meta property="og:title" content="Accelerator lead times" />
                 <meta name="author" content="Jo Writer" />
                 <meta property="article:published_time" content="2024-03-01T12:00:00Z" />
               </head>
               <body><nav>Home</nav><article><p>{LONG_PARA}</p><p>{LONG_PARA}</p></article></body></html>"#
        );
        let out = extract_readable_text(&html, "https://example.com/a", 120_000);
        assert_eq!(out.method, "readable");
        assert_eq!(out.confidence, 0.7);
        assert_eq!(out.title.as_deref(), Some("Accelerator lead times"));
        assert_eq!(out.author.as_deref(), Some("Jo Writer"));
        assert!(out.published_at.is_some());
        assert!(out.text.contains("supply chain"));
        assert!(!out.text.contains("Home"));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn density_tier_picks_up_paragraph_pages() {
        let html = format!(
            "<html><head><title>Plain page</title></head><body><p>{LONG_PARA}</p><p>{LONG_PARA}</p></body></html>"
        );
        let out = extract_readable_text(&html, "https://example.com/b", 120_000);
        assert_eq!(out.method, "density");
        assert_eq!(out.confidence, 0.5);
        assert_eq!(out.title.as_deref(), Some("Plain page"));
        assert!(out.text.contains("\n\n"), "paragraph break preserved");
    }

    #[test]
    fn strip_fallback_drops_script_and_style() {
        let html = r#"<html><head><title>Short</title><style>p { color: red }</style></head>
            <body><script>var secret = 1;</script><p>Signal snippet here.</p>
            <noscript>enable js</noscript><p>Second paragraph with more context.</p></body></html>"#;
        let out = extract_readable_text(html, "https://example.com/c", 120_000);
        assert_eq!(out.method, "strip");
        assert_eq!(out.confidence, 0.4);
        assert!(out.warnings.iter().any(|w| w == "fallback_extractor"));
        assert!(out.text.contains("Signal snippet here."));
        assert!(!out.text.contains("secret"));
        assert!(!out.text.contains("color: red"));
        assert!(!out.text.contains("enable js"));
    }

    #[test]
    fn truncation_appends_warning() {
        let html = format!("<html><body><article><p>{LONG_PARA}</p></article></body></html>");
        let out = extract_readable_text(&html, "https://example.com/d", 50);
        assert!(out.text.chars().count() <= 50);
        assert!(out.warnings.iter().any(|w| w == "text_truncated"));
    }

    #[test]
    fn published_at_normalizes_trailing_z() {
        assert!(parse_published_at("2024-01-02T03:04:05Z").is_some());
        assert!(parse_published_at("2024-01-02T03:04:05+02:00").is_some());
        assert!(parse_published_at("2024-01-02").is_some());
        assert!(parse_published_at("not a date").is_none());
    }

    #[test]
    fn empty_html_yields_empty_text() {
        let out = extract_readable_text("", "https://example.com/e", 120_000);
        assert!(out.text.is_empty());
    }
}
