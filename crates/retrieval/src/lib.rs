use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use contextd_storage::{ArticleHit, Storage};

pub const DEFAULT_MAX_ITEMS: usize = 3;
pub const DEFAULT_TOKEN_BUDGET: usize = 800;
pub const DEFAULT_MAX_SIGNALS: usize = 3;

/// Queries whose wording asks for specifics get `expand_sections` instead of
/// `proceed` at medium confidence.
const DETAIL_KEYWORDS: [&str; 13] = [
    "implement",
    "implementation",
    "detail",
    "details",
    "how",
    "steps",
    "code",
    "example",
    "schema",
    "query",
    "sql",
    "config",
    "configuration",
];

#[derive(Debug, Clone, Deserialize)]
pub struct PackRequest {
    pub query: String,
    #[serde(default)]
    pub topics: Option<Vec<String>>,
    #[serde(default)]
    pub token_budget: Option<usize>,
    #[serde(default)]
    pub recency_days: Option<i64>,
    #[serde(default)]
    pub max_items: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Med,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Proceed,
    RefineQuery,
    ExpandSections,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Med => "med",
            Confidence::High => "high",
        }
    }
}

impl NextAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextAction::Proceed => "proceed",
            NextAction::RefineQuery => "refine_query",
            NextAction::ExpandSections => "expand_sections",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PackCite {
    pub article_id: String,
    pub section_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackSignal {
    pub claim: String,
    pub why: String,
    pub tradeoff: Option<String>,
    pub cite: PackCite,
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub url: String,
    pub article_id: String,
    pub section_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackItem {
    pub article_id: String,
    pub title: String,
    pub url: String,
    pub summary: String,
    pub signals: Vec<PackSignal>,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pack {
    pub items: Vec<PackItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimingMs {
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    pub trace_id: String,
    pub retrieved_article_ids: Vec<String>,
    pub timing_ms: TimingMs,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackResponse {
    pub pack: Pack,
    pub retrieval_confidence: Confidence,
    pub next_action: NextAction,
    pub trace: Trace,
}

/// Character budgets derived from the caller's token budget. Tokens are
/// approximated at four characters each.
#[derive(Debug, Clone, Copy)]
pub struct PackBudget {
    pub char_budget: usize,
    pub max_summary_chars: usize,
    pub max_signal_chars: usize,
    pub max_items: usize,
}

impl PackBudget {
    pub fn new(token_budget: usize, max_items: usize) -> Self {
        let char_budget = token_budget.max(1) * 4;
        let per_item_budget = (char_budget / max_items).max(200);
        Self {
            char_budget,
            max_summary_chars: 400.min((per_item_budget as f64 * 0.6) as usize),
            max_signal_chars: 240.min((per_item_budget as f64 * 0.4) as usize),
            max_items,
        }
    }
}

/// Produces context packs: FTS candidates filtered by topic, packed into the
/// character budget with trimmed signals and deduplicated citations.
pub struct Retriever {
    storage: Storage,
}

impl Retriever {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn context_pack(&self, req: &PackRequest) -> Result<PackResponse> {
        let start = Instant::now();

        let max_items = req.max_items.unwrap_or(DEFAULT_MAX_ITEMS).max(1);
        let token_budget = req.token_budget.unwrap_or(DEFAULT_TOKEN_BUDGET);
        let budget = PackBudget::new(token_budget, max_items);

        let rows = self
            .storage
            .search_articles(&req.query, (max_items * 5) as i64, req.recency_days)
            .await?;

        let topics = normalize_topics(req.topics.as_deref());
        let rows: Vec<ArticleHit> = if topics.is_empty() {
            rows
        } else {
            rows.into_iter()
                .filter(|row| row_matches_topics(&row.topics, &topics))
                .collect()
        };

        let assembled = assemble_pack(&req.query, &rows, &budget);

        let trace_id = Uuid::new_v4().to_string();
        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            trace_id = %trace_id,
            query = %req.query.chars().take(120).collect::<String>(),
            retrieved = assembled.retrieved_article_ids.len(),
            confidence = ?assembled.confidence,
            next_action = ?assembled.next_action,
            "context_pack"
        );

        Ok(PackResponse {
            pack: Pack {
                items: assembled.items,
            },
            retrieval_confidence: assembled.confidence,
            next_action: assembled.next_action,
            trace: Trace {
                trace_id,
                retrieved_article_ids: assembled.retrieved_article_ids,
                timing_ms: TimingMs { total: elapsed_ms },
            },
        })
    }
}

pub struct AssembledPack {
    pub items: Vec<PackItem>,
    pub retrieved_article_ids: Vec<String>,
    pub confidence: Confidence,
    pub next_action: NextAction,
}

/// Pure pack assembly over ranked candidate rows. Stops at `max_items` or
/// when the budget is spent; the first item is always included, with its
/// summary squeezed down to fit when necessary.
pub fn assemble_pack(query: &str, rows: &[ArticleHit], budget: &PackBudget) -> AssembledPack {
    let top_score = rows.first().map(|row| row.score).unwrap_or(0.0);

    let mut items: Vec<PackItem> = Vec::new();
    let mut retrieved_article_ids: Vec<String> = Vec::new();
    let mut used_chars = 0usize;

    for row in rows {
        if items.len() >= budget.max_items {
            break;
        }
        if row.article_id.is_empty() {
            continue;
        }
        let signals = build_signals(
            &row.signals,
            &row.article_id,
            DEFAULT_MAX_SIGNALS,
            budget.max_signal_chars,
        );
        if signals.is_empty() {
            continue;
        }

        let mut summary = trim_text(&row.summary, budget.max_summary_chars);
        let item_size = summary.chars().count()
            + signals
                .iter()
                .map(|s| {
                    s.claim.chars().count()
                        + s.why.chars().count()
                        + s.tradeoff.as_ref().map(|t| t.chars().count()).unwrap_or(0)
                })
                .sum::<usize>();

        if used_chars + item_size > budget.char_budget {
            if !items.is_empty() {
                break;
            }
            summary = trim_text(&summary, (budget.char_budget / 4).max(80));
        }

        let citations = build_citations(&signals, &row.url);
        retrieved_article_ids.push(row.article_id.clone());
        items.push(PackItem {
            article_id: row.article_id.clone(),
            title: row.title.clone(),
            url: row.url.clone(),
            summary,
            signals,
            citations,
        });
        used_chars += item_size;
    }

    let (confidence, next_action) = if items.is_empty() {
        (Confidence::Low, NextAction::RefineQuery)
    } else {
        let cited_signals = items[0]
            .signals
            .iter()
            .filter(|s| s.cite.section_id.is_some())
            .count();
        let confidence = determine_confidence(top_score, cited_signals);
        (confidence, determine_next_action(confidence, query))
    };

    AssembledPack {
        items,
        retrieved_article_ids,
        confidence,
        next_action,
    }
}

/// Lenient read of a stored signals array. Entries missing a claim or a why
/// are skipped rather than failing the pack.
fn build_signals(
    raw: &Value,
    article_id: &str,
    max_signals: usize,
    max_signal_chars: usize,
) -> Vec<PackSignal> {
    let Some(list) = raw.as_array() else {
        return Vec::new();
    };

    let mut signals = Vec::new();
    for entry in list {
        let Some(obj) = entry.as_object() else {
            continue;
        };
        let claim = obj
            .get("claim")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();
        let why = obj.get("why").and_then(Value::as_str).unwrap_or("").trim();
        if claim.is_empty() || why.is_empty() {
            continue;
        }
        let tradeoff = obj
            .get("tradeoff")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(|t| trim_text(t, max_signal_chars));
        let section_id = obj
            .get("cite")
            .and_then(|c| c.get("section_id"))
            .and_then(Value::as_str)
            .map(String::from);

        signals.push(PackSignal {
            claim: trim_text(claim, max_signal_chars),
            why: trim_text(why, max_signal_chars),
            tradeoff,
            cite: PackCite {
                article_id: article_id.to_string(),
                section_id,
            },
        });
        if signals.len() >= max_signals {
            break;
        }
    }
    signals
}

fn build_citations(signals: &[PackSignal], url: &str) -> Vec<Citation> {
    let mut seen: Vec<(&str, Option<&str>)> = Vec::new();
    let mut citations = Vec::new();
    for signal in signals {
        let key = (
            signal.cite.article_id.as_str(),
            signal.cite.section_id.as_deref(),
        );
        if signal.cite.article_id.is_empty() || seen.contains(&key) {
            continue;
        }
        seen.push(key);
        citations.push(Citation {
            url: url.to_string(),
            article_id: signal.cite.article_id.clone(),
            section_id: signal.cite.section_id.clone(),
        });
    }
    citations
}

fn determine_confidence(top_score: f32, cited_signals: usize) -> Confidence {
    if top_score < 0.05 {
        return Confidence::Low;
    }
    if top_score >= 0.2 && cited_signals >= 2 {
        return Confidence::High;
    }
    Confidence::Med
}

fn determine_next_action(confidence: Confidence, query: &str) -> NextAction {
    match confidence {
        Confidence::Low => NextAction::RefineQuery,
        Confidence::Med if query_mentions_detail(query) => NextAction::ExpandSections,
        _ => NextAction::Proceed,
    }
}

fn query_mentions_detail(query: &str) -> bool {
    let query_lower = query.to_lowercase();
    DETAIL_KEYWORDS.iter().any(|k| query_lower.contains(k))
}

fn normalize_topics(topics: Option<&[String]>) -> Vec<String> {
    topics
        .unwrap_or_default()
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn row_matches_topics(row_topics: &Value, filter: &[String]) -> bool {
    let Some(list) = row_topics.as_array() else {
        return false;
    };
    list.iter()
        .filter_map(Value::as_str)
        .map(|t| t.trim().to_lowercase())
        .any(|t| !t.is_empty() && filter.contains(&t))
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rich_hit(article_id: &str, score: f32) -> ArticleHit {
        ArticleHit {
            article_id: article_id.to_string(),
            url: format!("https://example.com/{article_id}"),
            title: "Accelerator lead times".to_string(),
            summary: "Lead times for accelerators have stretched well past historical norms, \
                      with the largest buyers absorbing most capacity and everyone else waiting \
                      in a queue that keeps growing quarter over quarter, according to reports."
                .to_string(),
            signals: serde_json::json!([
                {
                    "claim": "Lead times stretched to forty weeks for most buyers this year",
                    "why": "Multiple independent buyers report identical delays in procurement",
                    "tradeoff": "Smaller orders clear the queue faster",
                    "supporting_snippet": "lead times stretched",
                    "cite": {"section_id": "s01"}
                },
                {
                    "claim": "Hyperscalers absorb most available capacity before open market sales",
                    "why": "Allocation contracts are signed a year ahead of fabrication",
                    "supporting_snippet": "absorb most capacity",
                    "cite": {"section_id": "s02"}
                },
                {
                    "claim": "Second-tier clouds get pushed to the back of the queue",
                    "why": "Their volumes do not justify priority allocation",
                    "supporting_snippet": "pushed to the back",
                    "cite": {"section_id": "s02"}
                },
                {
                    "claim": "A fourth signal that must be dropped by the cap",
                    "why": "Only three signals are packed per item",
                    "cite": {"section_id": "s03"}
                }
            ]),
            topics: serde_json::json!(["ai", "hardware"]),
            published_at: None,
            ingested_at: Utc::now(),
            score,
        }
    }

    fn default_budget() -> PackBudget {
        PackBudget::new(DEFAULT_TOKEN_BUDGET, DEFAULT_MAX_ITEMS)
    }

    #[test]
    fn budget_derivation_matches_the_documented_rules() {
        let budget = PackBudget::new(800, 3);
        assert_eq!(budget.char_budget, 3200);
        assert_eq!(budget.max_summary_chars, 400);
        assert_eq!(budget.max_signal_chars, 240);

        let tight = PackBudget::new(50, 3);
        assert_eq!(tight.char_budget, 200);
        // per-item floor of 200 applies
        assert_eq!(tight.max_summary_chars, 120);
        assert_eq!(tight.max_signal_chars, 80);
    }

    #[test]
    fn empty_candidates_yield_low_confidence_refine() {
        let pack = assemble_pack("asdfqwer", &[], &default_budget());
        assert!(pack.items.is_empty());
        assert_eq!(pack.confidence, Confidence::Low);
        assert_eq!(pack.next_action, NextAction::RefineQuery);
    }

    #[test]
    fn signals_are_capped_at_three_per_item() {
        let rows = vec![rich_hit("url_a", 0.5)];
        let pack = assemble_pack("lead times", &rows, &default_budget());
        assert_eq!(pack.items.len(), 1);
        assert_eq!(pack.items[0].signals.len(), DEFAULT_MAX_SIGNALS);
    }

    #[test]
    fn tight_budget_packs_exactly_one_trimmed_item() {
        let rows = vec![
            rich_hit("url_a", 0.3),
            rich_hit("url_b", 0.25),
            rich_hit("url_c", 0.2),
        ];
        let budget = PackBudget::new(50, 3);
        let pack = assemble_pack("lead times", &rows, &budget);
        assert_eq!(pack.items.len(), 1);
        assert!(pack.items[0].summary.chars().count() <= 80);
        assert_eq!(pack.confidence, Confidence::High);
    }

    #[test]
    fn zero_signal_articles_are_dropped() {
        let mut row = rich_hit("url_a", 0.5);
        row.signals = serde_json::json!([{"claim": "", "why": ""}]);
        let pack = assemble_pack("lead times", &[row], &default_budget());
        assert!(pack.items.is_empty());
        assert_eq!(pack.confidence, Confidence::Low);
    }

    #[test]
    fn confidence_tiers_follow_score_and_citations() {
        assert_eq!(determine_confidence(0.01, 3), Confidence::Low);
        assert_eq!(determine_confidence(0.1, 3), Confidence::Med);
        assert_eq!(determine_confidence(0.3, 1), Confidence::Med);
        assert_eq!(determine_confidence(0.3, 2), Confidence::High);
    }

    #[test]
    fn detail_queries_expand_sections_at_medium_confidence() {
        assert_eq!(
            determine_next_action(Confidence::Med, "how do I configure this"),
            NextAction::ExpandSections
        );
        assert_eq!(
            determine_next_action(Confidence::Med, "market outlook"),
            NextAction::Proceed
        );
        assert_eq!(
            determine_next_action(Confidence::Low, "how"),
            NextAction::RefineQuery
        );
        assert_eq!(
            determine_next_action(Confidence::High, "schema details"),
            NextAction::Proceed
        );
    }

    #[test]
    fn citations_are_deduplicated_per_item() {
        let rows = vec![rich_hit("url_a", 0.5)];
        let pack = assemble_pack("lead times", &rows, &default_budget());
        // signals cite s01, s02, s02 — two distinct citations survive
        assert_eq!(pack.items[0].citations.len(), 2);
    }

    #[test]
    fn topic_filter_is_case_insensitive_intersection() {
        let filter = normalize_topics(Some(&[" AI ".to_string()]));
        assert!(row_matches_topics(&serde_json::json!(["ai"]), &filter));
        assert!(row_matches_topics(&serde_json::json!(["AI", "other"]), &filter));
        assert!(!row_matches_topics(&serde_json::json!(["hardware"]), &filter));
        assert!(!row_matches_topics(&serde_json::json!("not a list"), &filter));
    }

    #[test]
    fn signal_fields_are_trimmed_to_budget() {
        let rows = vec![rich_hit("url_a", 0.5)];
        let budget = PackBudget::new(50, 3);
        let pack = assemble_pack("lead times", &rows, &budget);
        for signal in &pack.items[0].signals {
            assert!(signal.claim.chars().count() <= budget.max_signal_chars);
            assert!(signal.why.chars().count() <= budget.max_signal_chars);
        }
    }
}
