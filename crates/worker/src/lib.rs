use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use tokio::signal;
use tracing::{info, warn};

use contextd_core::config::{EnrichConfig, ExtractConfig, FetchConfig};
use contextd_core::{ArticleStatus, IntelError, JobStatus};
use contextd_enricher::ArticleEnricher;
use contextd_extractor::extract_readable_text;
use contextd_extractor::sectionise::sectionise;
use contextd_fetcher::PageFetcher;
use contextd_storage::{ClaimedJob, ExtractedFields, Storage};
use uuid::Uuid;

/// Runs the ingest pipeline: claim a job, fetch the page, extract and
/// sectionise it, persist, then enrich. Early stages are persisted before
/// later ones run, so an enrichment failure leaves a usable `partial`
/// article behind.
pub struct Worker {
    storage: Storage,
    fetcher: PageFetcher,
    enricher: ArticleEnricher,
    extract: ExtractConfig,
    sleep_seconds: u64,
}

impl Worker {
    pub fn new(
        storage: Storage,
        fetch: FetchConfig,
        extract: ExtractConfig,
        enrich: EnrichConfig,
        sleep_seconds: u64,
    ) -> Result<Self> {
        Ok(Self {
            storage,
            fetcher: PageFetcher::new(fetch)?,
            enricher: ArticleEnricher::new(enrich)?,
            extract,
            sleep_seconds,
        })
    }

    /// Claim and process a single job. Returns false when the queue is empty.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(job) = self.storage.claim_next_job().await? else {
            return Ok(false);
        };
        self.process_job(&job).await?;
        Ok(true)
    }

    /// Process jobs until interrupted, sleeping when the queue runs dry.
    pub async fn run(&self) -> Result<()> {
        info!(sleep_seconds = self.sleep_seconds, "worker started");
        loop {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("worker shutting down");
                    break;
                }
                processed = self.run_once() => {
                    let idle = match processed {
                        Ok(processed) => !processed,
                        Err(e) => {
                            warn!(error = %e, "worker iteration failed");
                            true
                        }
                    };
                    if idle {
                        tokio::time::sleep(Duration::from_secs(self.sleep_seconds.max(1))).await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn process_job(&self, job: &ClaimedJob) -> Result<()> {
        let job_id = job.job_id;
        let article_id = job.article_id.as_str();
        let url = if job.url_canonical.is_empty() {
            job.url_original.as_str()
        } else {
            job.url_canonical.as_str()
        };

        if article_id.is_empty() || url.is_empty() {
            self.storage
                .update_job_status(
                    job_id,
                    JobStatus::Failed,
                    Some(&IntelError::MissingJobData.to_string()),
                )
                .await?;
            return Ok(());
        }

        let fetched = match self.fetcher.fetch(url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                return self.fail(job_id, article_id, &e.to_string()).await;
            }
        };

        if fetched.status_code >= 400 {
            let reason = IntelError::HttpStatus(fetched.status_code).to_string();
            return self.fail(job_id, article_id, &reason).await;
        }
        if fetched.html.is_empty() {
            let reason = IntelError::EmptyHtml.to_string();
            return self.fail(job_id, article_id, &reason).await;
        }

        let extracted = extract_readable_text(&fetched.html, url, self.extract.max_chars);
        if extracted.text.is_empty() {
            let reason = IntelError::EmptyText.to_string();
            return self.fail(job_id, article_id, &reason).await;
        }

        let sectionised = sectionise(&extracted.text);
        self.storage
            .replace_sections(article_id, &sectionised.sections)
            .await?;

        let fetch_warnings: Vec<&str> = if fetched.truncated {
            vec!["truncated"]
        } else {
            Vec::new()
        };
        let fetch_meta = serde_json::json!({
            "http_status": fetched.status_code,
            "content_type": fetched.header("content-type"),
            "fetched_at": Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            "warnings": fetch_warnings,
        });
        let extraction_meta = serde_json::json!({
            "method": extracted.method,
            "confidence": extracted.confidence,
            "warnings": extracted.warnings,
        });

        self.storage
            .mark_article_extracted(&ExtractedFields {
                article_id: article_id.to_string(),
                title: extracted.title.clone(),
                author: extracted.author.clone(),
                published_at: extracted.published_at,
                extracted_text: Some(extracted.text.clone()),
                raw_html: Some(fetched.html.clone()),
                http_status: Some(fetched.status_code as i32),
                content_type: fetched.header("content-type").map(str::to_string),
                etag: fetched.header("etag").map(str::to_string),
                last_modified: fetched.header("last-modified").map(str::to_string),
                fetch_meta,
                extraction_meta,
                outline: sectionised.outline.clone(),
            })
            .await?;

        if !job.enrich {
            self.storage
                .update_job_status(job_id, JobStatus::Done, None)
                .await?;
            info!(job_id = %job_id, article_id, status = "extracted", "intel job done");
            return Ok(());
        }

        let existing_topics = self
            .storage
            .get_article(article_id)
            .await?
            .map(|article| string_list(&article.topics))
            .unwrap_or_default();

        match self
            .enricher
            .enrich(extracted.title.as_deref(), url, &sectionised.sections)
            .await
        {
            Ok((output, meta)) => {
                let topics = if output.topics.is_empty() {
                    existing_topics
                } else {
                    output.topics.clone()
                };
                self.storage
                    .mark_article_enriched(
                        article_id,
                        &output.summary,
                        &output.signals,
                        &topics,
                        serde_json::to_value(&meta)?,
                        Some(&sectionised.outline),
                        ArticleStatus::Enriched,
                    )
                    .await?;
                self.storage
                    .update_job_status(job_id, JobStatus::Done, None)
                    .await?;
                info!(job_id = %job_id, article_id, status = "enriched", "intel job done");
            }
            Err(e) => {
                let enrichment_meta = serde_json::json!({
                    "warnings": ["enrichment_failed"],
                    "error": e.to_string(),
                });
                self.storage
                    .mark_article_enriched(
                        article_id,
                        "",
                        &[],
                        &existing_topics,
                        enrichment_meta,
                        Some(&sectionised.outline),
                        ArticleStatus::Partial,
                    )
                    .await?;
                self.storage
                    .update_job_status(job_id, JobStatus::Failed, Some(&e.to_string()))
                    .await?;
                warn!(job_id = %job_id, article_id, error = %e, "intel job failed");
            }
        }

        Ok(())
    }

    /// Pipeline failure before extraction succeeded: the job records the
    /// reason, the article drops to `failed`.
    async fn fail(&self, job_id: Uuid, article_id: &str, reason: &str) -> Result<()> {
        warn!(job_id = %job_id, article_id, reason, "intel job failed");
        self.storage
            .update_job_status(job_id, JobStatus::Failed, Some(reason))
            .await?;
        self.storage.mark_article_failed(article_id).await?;
        Ok(())
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
