use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Json;
use tracing::warn;

use contextd_core::{canonicalize, compute_article_id, JobStatus};
use contextd_retrieval::{PackRequest, PackResponse};

use crate::error::ApiError;
use crate::fixtures;
use crate::models::*;
use crate::AppState;

const MAX_SECTION_IDS: usize = 8;
const DEFAULT_MAX_CHUNKS: usize = 3;
const MAX_MAX_CHUNKS: usize = 10;
const DEFAULT_MAX_CHARS: usize = 600;
const MIN_MAX_CHARS: usize = 80;

pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .storage
        .check_connectivity()
        .await
        .map_err(|_| ApiError::Unavailable)?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// Canonicalize, seed the article row, and enqueue one job per URL.
/// Re-submitting a known URL enqueues again; `deduped` is reserved.
pub async fn ingest_urls(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestUrlsRequest>,
) -> Result<Json<IngestUrlsResponse>, ApiError> {
    let job_status = if req.enrich {
        JobStatus::Queued
    } else {
        JobStatus::QueuedNoEnrich
    };

    let mut results = Vec::with_capacity(req.urls.len());
    for url in &req.urls {
        let canonical = canonicalize(url);
        let article_id = match compute_article_id(&canonical) {
            Ok(id) => id,
            Err(e) => {
                warn!(url = %url, error = %e, "ingest rejected url");
                results.push(IngestUrlResult {
                    url: url.clone(),
                    status: "failed",
                    article_id: None,
                    job_id: None,
                    reason: Some(e.to_string()),
                });
                continue;
            }
        };

        state
            .storage
            .seed_article(
                &article_id,
                &canonical,
                Some(url),
                req.topics.as_deref(),
                req.tags.as_deref(),
                req.force_refetch,
            )
            .await?;
        let job_id = state
            .storage
            .create_job(url, &canonical, &article_id, job_status)
            .await?;

        results.push(IngestUrlResult {
            url: url.clone(),
            status: "queued",
            article_id: Some(article_id),
            job_id: Some(job_id.to_string()),
            reason: None,
        });
    }

    Ok(Json(IngestUrlsResponse { results }))
}

pub async fn ingest_fixtures(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FixtureIngestRequest>,
) -> Result<Json<FixtureIngestResponse>, ApiError> {
    let ingested_article_ids =
        fixtures::ingest_fixture_bundle(&state.storage, &req.fixture_bundle).await?;
    Ok(Json(FixtureIngestResponse {
        ingested_article_ids,
    }))
}

pub async fn context_pack(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PackRequest>,
) -> Result<Json<PackResponse>, ApiError> {
    let response = state.retriever.context_pack(&req).await?;
    Ok(Json(response))
}

pub async fn article_status(
    State(state): State<Arc<AppState>>,
    Path(article_id): Path<String>,
) -> Result<Json<ArticleStatusResponse>, ApiError> {
    let record = state
        .storage
        .get_article(&article_id)
        .await?
        .ok_or(ApiError::NotFound("Article not found"))?;
    let last_error = state.storage.get_latest_job_error(&article_id).await?;
    Ok(Json(ArticleStatusResponse::from_record(record, last_error)))
}

pub async fn article_outline(
    State(state): State<Arc<AppState>>,
    Path(article_id): Path<String>,
) -> Result<Json<OutlineResponse>, ApiError> {
    let outline = state
        .storage
        .get_outline(&article_id)
        .await?
        .ok_or(ApiError::NotFound("Article not found"))?;
    Ok(Json(OutlineResponse {
        article_id,
        outline,
    }))
}

pub async fn article_sections(
    State(state): State<Arc<AppState>>,
    Path(article_id): Path<String>,
    Json(req): Json<SectionsRequest>,
) -> Result<Json<SectionsResponse>, ApiError> {
    state
        .storage
        .get_outline(&article_id)
        .await?
        .ok_or(ApiError::NotFound("Article not found"))?;

    let section_ids: Vec<String> = req.section_ids.into_iter().take(MAX_SECTION_IDS).collect();
    let sections = state.storage.get_sections(&article_id, &section_ids).await?;
    Ok(Json(SectionsResponse {
        article_id,
        sections,
    }))
}

pub async fn chunks_search(
    State(state): State<Arc<AppState>>,
    Path(article_id): Path<String>,
    Json(req): Json<ChunkSearchRequest>,
) -> Result<Json<ChunkSearchResponse>, ApiError> {
    state
        .storage
        .get_outline(&article_id)
        .await?
        .ok_or(ApiError::NotFound("Article not found"))?;

    let max_chunks = req
        .max_chunks
        .unwrap_or(DEFAULT_MAX_CHUNKS)
        .clamp(1, MAX_MAX_CHUNKS);
    let max_chars = req.max_chars.unwrap_or(DEFAULT_MAX_CHARS).max(MIN_MAX_CHARS);

    let hits = state
        .storage
        .search_sections(&article_id, &req.query, max_chunks as i64)
        .await?;

    let chunks = hits
        .into_iter()
        .map(|hit| {
            let snippet = hit.snippet.replace("<b>", "").replace("</b>", "");
            Chunk {
                section_id: hit.section_id,
                snippet: trim_text(&snippet, max_chars),
                score: Some(hit.score),
            }
        })
        .collect();

    Ok(Json(ChunkSearchResponse { article_id, chunks }))
}

/// Character-count trim with an ellipsis suffix when the cut happens.
fn trim_text(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}
