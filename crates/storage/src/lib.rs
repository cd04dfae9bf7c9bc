use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use contextd_core::{ArticleStatus, JobStatus, OutlineEntry, Section, Signal};

/// A job reserved by `claim_next_job`. `enrich` is derived from the queued
/// status: `queued_no_enrich` jobs stop after extraction.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job_id: Uuid,
    pub url_original: String,
    pub url_canonical: String,
    pub article_id: String,
    pub attempts: i32,
    pub enrich: bool,
}

/// Full article row, as served by the status endpoint.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleRecord {
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
    pub outbound_links: serde_json::Value,
    pub extracted_text: Option<String>,
    pub http_status: Option<i32>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub fetch_meta: Option<serde_json::Value>,
    pub extraction_meta: Option<serde_json::Value>,
    pub enrichment_meta: Option<serde_json::Value>,
}

/// One article FTS candidate with its rank score.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleHit {
    pub article_id: String,
    pub url: String,
    pub title: String,
    pub summary: String,
    pub signals: serde_json::Value,
    pub topics: serde_json::Value,
    pub published_at: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
    pub score: f32,
}

/// One section FTS match with a highlighted snippet.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SectionHit {
    pub section_id: String,
    pub snippet: String,
    pub score: f32,
    pub rank: i32,
}

/// Extracted article fields persisted after the extract stage.
#[derive(Debug, Clone)]
pub struct ExtractedFields {
    pub article_id: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub extracted_text: Option<String>,
    pub raw_html: Option<String>,
    pub http_status: Option<i32>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub fetch_meta: serde_json::Value,
    pub extraction_meta: serde_json::Value,
    pub outline: Vec<OutlineEntry>,
}

/// Bulk article upsert, used by the fixture loader.
#[derive(Debug, Clone)]
pub struct ArticleUpsert {
    pub article_id: String,
    pub url: String,
    pub title: String,
    pub publisher: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub topics: serde_json::Value,
    pub summary: String,
    pub signals: serde_json::Value,
    pub outline: serde_json::Value,
    pub outbound_links: serde_json::Value,
    pub status: ArticleStatus,
}

#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_pool_size(database_url, 10).await
    }

    pub async fn with_pool_size(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!(max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(&self.pool)
            .await?;
        info!("migrations complete");
        Ok(())
    }

    pub async fn check_connectivity(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Upsert the identity row for a freshly ingested URL. Leaves extracted
    /// and enriched fields alone unless `force_reset` is set, which wipes
    /// them so the next pipeline run starts from a clean slate.
    pub async fn seed_article(
        &self,
        article_id: &str,
        url: &str,
        url_original: Option<&str>,
        topics: Option<&[String]>,
        tags: Option<&[String]>,
        force_reset: bool,
    ) -> Result<()> {
        let topics = topics.map(serde_json::to_value).transpose()?;
        let tags = tags.map(serde_json::to_value).transpose()?;

        let sql = if force_reset {
            r#"INSERT INTO articles (article_id, url, url_original, title, status, topics, tags)
               VALUES ($1, $2, $3, '', 'queued', COALESCE($4, '[]'::jsonb), COALESCE($5, '[]'::jsonb))
               ON CONFLICT (article_id) DO UPDATE SET
                   url = EXCLUDED.url,
                   url_original = COALESCE($3, articles.url_original),
                   topics = COALESCE($4, articles.topics),
                   tags = COALESCE($5, articles.tags),
                   status = EXCLUDED.status,
                   summary = '',
                   signals = '[]'::jsonb,
                   outline = '[]'::jsonb,
                   outbound_links = '[]'::jsonb,
                   raw_html = NULL,
                   extracted_text = NULL,
                   http_status = NULL,
                   content_type = NULL,
                   etag = NULL,
                   last_modified = NULL,
                   fetch_meta = NULL,
                   extraction_meta = NULL,
                   enrichment_meta = NULL,
                   updated_at = now()"#
        } else {
            r#"INSERT INTO articles (article_id, url, url_original, title, status, topics, tags)
               VALUES ($1, $2, $3, '', 'queued', COALESCE($4, '[]'::jsonb), COALESCE($5, '[]'::jsonb))
               ON CONFLICT (article_id) DO UPDATE SET
                   url = EXCLUDED.url,
                   url_original = COALESCE($3, articles.url_original),
                   topics = COALESCE($4, articles.topics),
                   tags = COALESCE($5, articles.tags),
                   status = EXCLUDED.status,
                   updated_at = now()"#
        };

        sqlx::query(sql)
            .bind(article_id)
            .bind(url)
            .bind(url_original)
            .bind(topics)
            .bind(tags)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bulk upsert of complete article rows (fixture ingestion path).
    pub async fn upsert_articles(&self, items: &[ArticleUpsert]) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            sqlx::query(
                r#"INSERT INTO articles
                       (article_id, url, title, publisher, author, published_at,
                        topics, summary, signals, outline, outbound_links, status)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                   ON CONFLICT (article_id) DO UPDATE SET
                       url = EXCLUDED.url,
                       title = EXCLUDED.title,
                       publisher = EXCLUDED.publisher,
                       author = EXCLUDED.author,
                       published_at = EXCLUDED.published_at,
                       topics = EXCLUDED.topics,
                       summary = EXCLUDED.summary,
                       signals = EXCLUDED.signals,
                       outline = EXCLUDED.outline,
                       outbound_links = EXCLUDED.outbound_links,
                       status = EXCLUDED.status,
                       updated_at = now()"#,
            )
            .bind(&item.article_id)
            .bind(&item.url)
            .bind(&item.title)
            .bind(&item.publisher)
            .bind(&item.author)
            .bind(item.published_at)
            .bind(&item.topics)
            .bind(&item.summary)
            .bind(&item.signals)
            .bind(&item.outline)
            .bind(&item.outbound_links)
            .bind(item.status.as_str())
            .execute(&self.pool)
            .await?;
            ids.push(item.article_id.clone());
        }
        Ok(ids)
    }

    pub async fn create_job(
        &self,
        url_original: &str,
        url_canonical: &str,
        article_id: &str,
        status: JobStatus,
    ) -> Result<Uuid> {
        let job_id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO ingest_jobs (job_id, url_original, url_canonical, article_id, status)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(job_id)
        .bind(url_original)
        .bind(url_canonical)
        .bind(article_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(job_id)
    }

    /// Reserve the oldest claimable job for this worker. The row lock plus
    /// SKIP LOCKED guarantees two concurrent claims get distinct rows;
    /// `attempts` counts claims, not successes.
    pub async fn claim_next_job(&self) -> Result<Option<ClaimedJob>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid, String, String, String, String, i32)> = sqlx::query_as(
            r#"SELECT job_id, url_original, url_canonical, article_id, status, attempts
               FROM ingest_jobs
               WHERE status IN ('queued', 'retry', 'queued_no_enrich')
               ORDER BY created_at ASC
               FOR UPDATE SKIP LOCKED
               LIMIT 1"#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some((job_id, url_original, url_canonical, article_id, status, attempts)) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let attempts = attempts + 1;
        sqlx::query(
            r#"UPDATE ingest_jobs
               SET status = 'running', attempts = $2, updated_at = now()
               WHERE job_id = $1"#,
        )
        .bind(job_id)
        .bind(attempts)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(ClaimedJob {
            job_id,
            url_original,
            url_canonical,
            article_id,
            attempts,
            enrich: status != "queued_no_enrich",
        }))
    }

    pub async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE ingest_jobs
               SET status = $2, last_error = $3, updated_at = now()
               WHERE job_id = $1"#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace the full section set for an article in one transaction, so
    /// readers see either the old set or the new set, never a mix.
    pub async fn replace_sections(&self, article_id: &str, sections: &[Section]) -> Result<()> {
        let mut rows: Vec<&Section> = sections
            .iter()
            .filter(|s| !s.section_id.is_empty() && !s.content.is_empty())
            .collect();
        rows.sort_by(|a, b| (a.rank, &a.section_id).cmp(&(b.rank, &b.section_id)));

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM article_sections WHERE article_id = $1")
            .bind(article_id)
            .execute(&mut *tx)
            .await?;

        if !rows.is_empty() {
            let section_ids: Vec<String> = rows.iter().map(|s| s.section_id.clone()).collect();
            let headings: Vec<String> = rows.iter().map(|s| s.heading.clone()).collect();
            let contents: Vec<String> = rows.iter().map(|s| s.content.clone()).collect();
            let ranks: Vec<i32> = rows.iter().map(|s| s.rank).collect();

            sqlx::query(
                r#"INSERT INTO article_sections (article_id, section_id, heading, content, rank)
                   SELECT $1, * FROM UNNEST($2::text[], $3::text[], $4::text[], $5::int[])"#,
            )
            .bind(article_id)
            .bind(&section_ids)
            .bind(&headings)
            .bind(&contents)
            .bind(&ranks)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn mark_article_extracted(&self, fields: &ExtractedFields) -> Result<()> {
        let outline = serde_json::to_value(&fields.outline)?;
        sqlx::query(
            r#"UPDATE articles SET
                   title = COALESCE($2, ''),
                   author = $3,
                   published_at = $4,
                   extracted_text = $5,
                   raw_html = $6,
                   http_status = $7,
                   content_type = $8,
                   etag = $9,
                   last_modified = $10,
                   fetch_meta = $11,
                   extraction_meta = $12,
                   outline = $13,
                   status = 'extracted',
                   updated_at = now()
               WHERE article_id = $1"#,
        )
        .bind(&fields.article_id)
        .bind(&fields.title)
        .bind(&fields.author)
        .bind(fields.published_at)
        .bind(&fields.extracted_text)
        .bind(&fields.raw_html)
        .bind(fields.http_status)
        .bind(&fields.content_type)
        .bind(&fields.etag)
        .bind(&fields.last_modified)
        .bind(&fields.fetch_meta)
        .bind(&fields.extraction_meta)
        .bind(outline)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_article_enriched(
        &self,
        article_id: &str,
        summary: &str,
        signals: &[Signal],
        topics: &[String],
        enrichment_meta: serde_json::Value,
        outline: Option<&[OutlineEntry]>,
        status: ArticleStatus,
    ) -> Result<()> {
        let signals = serde_json::to_value(signals)?;
        let topics = serde_json::to_value(topics)?;
        let outline = outline.map(serde_json::to_value).transpose()?;
        sqlx::query(
            r#"UPDATE articles SET
                   summary = $2,
                   signals = $3,
                   topics = $4,
                   enrichment_meta = $5,
                   outline = COALESCE($6, articles.outline),
                   status = $7,
                   updated_at = now()
               WHERE article_id = $1"#,
        )
        .bind(article_id)
        .bind(summary)
        .bind(signals)
        .bind(topics)
        .bind(enrichment_meta)
        .bind(outline)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_article_failed(&self, article_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE articles SET status = 'failed', updated_at = now() WHERE article_id = $1",
        )
        .bind(article_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_article(&self, article_id: &str) -> Result<Option<ArticleRecord>> {
        let row = sqlx::query_as::<_, ArticleRecord>(
            r#"SELECT article_id, url, url_original, title, author, publisher,
                      published_at, ingested_at, updated_at, status, topics, tags,
                      summary, signals, outline, outbound_links, extracted_text,
                      http_status, content_type, etag, last_modified,
                      fetch_meta, extraction_meta, enrichment_meta
               FROM articles WHERE article_id = $1"#,
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_outline(&self, article_id: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT outline FROM articles WHERE article_id = $1")
                .bind(article_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(outline,)| outline))
    }

    pub async fn get_sections(
        &self,
        article_id: &str,
        section_ids: &[String],
    ) -> Result<Vec<Section>> {
        if section_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<(String, String, String, i32)> = sqlx::query_as(
            r#"SELECT section_id, heading, content, rank
               FROM article_sections
               WHERE article_id = $1 AND section_id = ANY($2)
               ORDER BY rank ASC"#,
        )
        .bind(article_id)
        .bind(section_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(section_id, heading, content, rank)| Section {
                section_id,
                heading,
                content,
                rank,
            })
            .collect())
    }

    /// Rank articles against the query with english full-text search over
    /// title + summary + signals. Blank queries never hit the database.
    pub async fn search_articles(
        &self,
        query: &str,
        limit: i64,
        recency_days: Option<i64>,
    ) -> Result<Vec<ArticleHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ArticleHit>(
            r#"SELECT
                   article_id, url, title, summary, signals, topics,
                   published_at, ingested_at,
                   ts_rank(
                       to_tsvector('english', coalesce(title, '') || ' ' ||
                           coalesce(summary, '') || ' ' || coalesce(signals::text, '')),
                       plainto_tsquery('english', $1)
                   ) AS score
               FROM articles
               WHERE to_tsvector('english', coalesce(title, '') || ' ' ||
                         coalesce(summary, '') || ' ' || coalesce(signals::text, ''))
                     @@ plainto_tsquery('english', $1)
                 AND ($3::bigint IS NULL
                      OR coalesce(published_at, ingested_at) >= now() - ($3 * interval '1 day'))
               ORDER BY score DESC, published_at DESC NULLS LAST, ingested_at DESC
               LIMIT $2"#,
        )
        .bind(query)
        .bind(limit.max(1))
        .bind(recency_days.map(|d| d.max(0)))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Full-text search within one article's sections, with highlighted
    /// snippets around the query terms.
    pub async fn search_sections(
        &self,
        article_id: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<SectionHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, SectionHit>(
            r#"SELECT
                   section_id,
                   ts_headline(
                       'english', content, plainto_tsquery('english', $2),
                       'MaxWords=30, MinWords=12, ShortWord=3'
                   ) AS snippet,
                   ts_rank(
                       to_tsvector('english', coalesce(content, '')),
                       plainto_tsquery('english', $2)
                   ) AS score,
                   rank
               FROM article_sections
               WHERE article_id = $1
                 AND to_tsvector('english', coalesce(content, '')) @@ plainto_tsquery('english', $2)
               ORDER BY score DESC, rank ASC
               LIMIT $3"#,
        )
        .bind(article_id)
        .bind(query)
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_latest_job_error(&self, article_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"SELECT last_error
               FROM ingest_jobs
               WHERE article_id = $1 AND last_error IS NOT NULL
               ORDER BY updated_at DESC
               LIMIT 1"#,
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(err,)| err))
    }

    pub async fn article_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn section_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM article_sections")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Job counts grouped by status, for the status report.
    pub async fn job_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM ingest_jobs GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
