use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use contextd_core::Section;
use contextd_storage::ArticleRecord;

fn default_true() -> bool {
    true
}

fn default_bundle() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
pub struct IngestUrlsRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub topics: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub force_refetch: bool,
    #[serde(default = "default_true")]
    pub enrich: bool,
}

#[derive(Debug, Serialize)]
pub struct IngestUrlResult {
    pub url: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestUrlsResponse {
    pub results: Vec<IngestUrlResult>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureIngestRequest {
    #[serde(default = "default_bundle")]
    pub fixture_bundle: String,
}

#[derive(Debug, Serialize)]
pub struct FixtureIngestResponse {
    pub ingested_article_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SectionsRequest {
    pub section_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SectionsResponse {
    pub article_id: String,
    pub sections: Vec<Section>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkSearchRequest {
    pub query: String,
    #[serde(default)]
    pub max_chunks: Option<usize>,
    #[serde(default)]
    pub max_chars: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct Chunk {
    pub section_id: String,
    pub snippet: String,
    pub score: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct ChunkSearchResponse {
    pub article_id: String,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Serialize)]
pub struct OutlineResponse {
    pub article_id: String,
    pub outline: serde_json::Value,
}

/// Full article status, including pipeline metadata and the newest job
/// error. Raw HTML stays out of the wire format.
#[derive(Debug, Serialize)]
pub struct ArticleStatusResponse {
    pub article_id: String,
    pub url: String,
    pub url_original: Option<String>,
    pub title: String,
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: String,
    pub topics: serde_json::Value,
    pub tags: serde_json::Value,
    pub summary: String,
    pub signals: serde_json::Value,
    pub outline: serde_json::Value,
    pub http_status: Option<i32>,
    pub content_type: Option<String>,
    pub fetch_meta: Option<serde_json::Value>,
    pub extraction_meta: Option<serde_json::Value>,
    pub enrichment_meta: Option<serde_json::Value>,
    pub last_error: Option<String>,
}

impl ArticleStatusResponse {
    pub fn from_record(record: ArticleRecord, last_error: Option<String>) -> Self {
        Self {
            article_id: record.article_id,
            url: record.url,
            url_original: record.url_original,
            title: record.title,
            author: record.author,
            publisher: record.publisher,
            published_at: record.published_at,
            ingested_at: record.ingested_at,
            updated_at: record.updated_at,
            status: record.status,
            topics: record.topics,
            tags: record.tags,
            summary: record.summary,
            signals: record.signals,
            outline: record.outline,
            http_status: record.http_status,
            content_type: record.content_type,
            fetch_meta: record.fetch_meta,
            extraction_meta: record.extraction_meta,
            enrichment_meta: record.enrichment_meta,
            last_error,
        }
    }
}
