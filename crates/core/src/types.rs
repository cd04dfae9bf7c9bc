use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Article lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Queued,
    Extracted,
    Enriched,
    Partial,
    Failed,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Queued => "queued",
            ArticleStatus::Extracted => "extracted",
            ArticleStatus::Enriched => "enriched",
            ArticleStatus::Partial => "partial",
            ArticleStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(ArticleStatus::Queued),
            "extracted" => Some(ArticleStatus::Extracted),
            "enriched" => Some(ArticleStatus::Enriched),
            "partial" => Some(ArticleStatus::Partial),
            "failed" => Some(ArticleStatus::Failed),
            _ => None,
        }
    }
}

/// Ingest job states. `queued_no_enrich` is a queued job whose pipeline
/// stops after extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    QueuedNoEnrich,
    Running,
    Retry,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::QueuedNoEnrich => "queued_no_enrich",
            JobStatus::Running => "running",
            JobStatus::Retry => "retry",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "queued_no_enrich" => Some(JobStatus::QueuedNoEnrich),
            "running" => Some(JobStatus::Running),
            "retry" => Some(JobStatus::Retry),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Pointer from a signal into the sectionised article.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionRef {
    pub section_id: String,
}

/// A claim/why/tradeoff triple grounded by a verbatim snippet from the
/// cited section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Signal {
    pub claim: String,
    pub why: String,
    #[serde(default)]
    pub tradeoff: Option<String>,
    pub supporting_snippet: String,
    pub cite: SectionRef,
}

/// One bounded run of paragraphs with a stable intra-article id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub section_id: String,
    pub heading: String,
    pub content: String,
    pub rank: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub section_id: String,
    pub heading: String,
    pub blurb: String,
}

/// Result of splitting extracted text into sections.
#[derive(Debug, Clone, Default)]
pub struct Sectionised {
    pub sections: Vec<Section>,
    pub outline: Vec<OutlineEntry>,
}

/// What the fetcher hands to the extractor.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub final_url: String,
    pub status_code: u16,
    /// Response headers with lowercased names.
    pub headers: HashMap<String, String>,
    pub html: String,
    pub truncated: bool,
}

impl FetchResult {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// What the extraction cascade produces for one page.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub text: String,
    pub method: &'static str,
    pub confidence: f64,
    pub warnings: Vec<String>,
}
