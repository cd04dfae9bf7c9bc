use chrono::{DateTime, Utc};
use serde::Deserialize;

use contextd_core::{ArticleStatus, Section};
use contextd_storage::{ArticleUpsert, Storage};

use crate::error::ApiError;

/// The embedded "default" bundle: pre-enriched articles used to exercise the
/// retrieval path without running the pipeline.
const DEFAULT_BUNDLE: [&str; 2] = [
    include_str!("../fixtures/accelerator_lead_times.json"),
    include_str!("../fixtures/grid_interconnect_queues.json"),
];

fn empty_array() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

#[derive(Debug, Deserialize)]
struct Fixture {
    metadata: FixtureMetadata,
    #[serde(default)]
    summary: String,
    #[serde(default = "empty_array")]
    signals: serde_json::Value,
    #[serde(default = "empty_array")]
    outline: serde_json::Value,
    #[serde(default = "empty_array")]
    outbound_links: serde_json::Value,
    #[serde(default)]
    sections: Vec<FixtureSection>,
}

#[derive(Debug, Deserialize)]
struct FixtureMetadata {
    article_id: String,
    url: String,
    title: String,
    #[serde(default)]
    publisher: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FixtureSection {
    section_id: String,
    #[serde(default)]
    heading: String,
    content: String,
    rank: i32,
}

pub async fn ingest_fixture_bundle(
    storage: &Storage,
    bundle: &str,
) -> Result<Vec<String>, ApiError> {
    if bundle != "default" {
        return Err(ApiError::BadRequest(format!(
            "Unknown fixture_bundle: {bundle}"
        )));
    }

    let mut upserts = Vec::new();
    let mut sections_by_article: Vec<(String, Vec<Section>)> = Vec::new();

    for raw in DEFAULT_BUNDLE {
        let fixture: Fixture = serde_json::from_str(raw)
            .map_err(|e| ApiError::BadRequest(format!("invalid fixture: {e}")))?;
        let meta = fixture.metadata;
        if meta.article_id.trim().is_empty()
            || meta.url.trim().is_empty()
            || meta.title.trim().is_empty()
        {
            return Err(ApiError::BadRequest(
                "fixture missing article_id, url or title".to_string(),
            ));
        }

        let published_at = meta.published_at.as_deref().and_then(parse_datetime);
        let sections = fixture
            .sections
            .into_iter()
            .map(|s| Section {
                section_id: s.section_id,
                heading: s.heading,
                content: s.content,
                rank: s.rank,
            })
            .collect();

        sections_by_article.push((meta.article_id.clone(), sections));
        upserts.push(ArticleUpsert {
            article_id: meta.article_id,
            url: meta.url,
            title: meta.title,
            publisher: meta.publisher,
            author: meta.author,
            published_at,
            topics: serde_json::json!(meta.topics),
            summary: fixture.summary,
            signals: fixture.signals,
            outline: fixture.outline,
            outbound_links: fixture.outbound_links,
            status: ArticleStatus::Enriched,
        });
    }

    let ids = storage.upsert_articles(&upserts).await?;
    for (article_id, sections) in &sections_by_article {
        storage.replace_sections(article_id, sections).await?;
    }
    Ok(ids)
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_fixtures_parse_and_stay_grounded() {
        for raw in DEFAULT_BUNDLE {
            let fixture: Fixture = serde_json::from_str(raw).unwrap();
            assert!(!fixture.metadata.article_id.is_empty());
            assert!(!fixture.sections.is_empty());

            // Every signal snippet must be verbatim text of its cited section.
            for signal in fixture.signals.as_array().unwrap() {
                let snippet = signal["supporting_snippet"].as_str().unwrap();
                let section_id = signal["cite"]["section_id"].as_str().unwrap();
                let section = fixture
                    .sections
                    .iter()
                    .find(|s| s.section_id == section_id)
                    .expect("cited section exists");
                assert!(
                    section.content.contains(snippet),
                    "ungrounded fixture snippet: {snippet}"
                );
            }
        }
    }
}
