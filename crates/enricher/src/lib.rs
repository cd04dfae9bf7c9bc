mod protocol;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use contextd_core::config::EnrichConfig;
use contextd_core::{IntelError, Section, Signal};

use protocol::{ChatMessage, ChatRequest, ChatResponse};

pub const PROMPT_VERSION: &str = "v1";

const SYSTEM_PROMPT: &str =
    "Return strict JSON only. No markdown. Follow the provided instructions.";

/// What the model must return, verbatim. Unknown fields are rejected rather
/// than coerced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnrichmentOutput {
    pub summary: String,
    pub signals: Vec<Signal>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub freshness_half_life_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentMeta {
    pub model: String,
    pub prompt_version: &'static str,
    pub token_usage: Option<serde_json::Value>,
}

/// Calls the chat-completions endpoint to produce a summary plus grounded
/// signals for one sectionised article, and rejects any answer that is not
/// strictly grounded in the supplied sections.
pub struct ArticleEnricher {
    client: reqwest::Client,
    config: EnrichConfig,
}

impl ArticleEnricher {
    pub fn new(config: EnrichConfig) -> Result<Self, IntelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_s))
            .build()
            .map_err(|e| IntelError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub async fn enrich(
        &self,
        title: Option<&str>,
        url: &str,
        sections: &[Section],
    ) -> Result<(EnrichmentOutput, EnrichmentMeta), IntelError> {
        if self.config.api_key.is_empty() {
            return Err(IntelError::Enrichment(
                "api key is required for enrichment".to_string(),
            ));
        }

        let prompt = build_prompt(title, url, sections, &self.config);
        let (content, token_usage) = self.call_llm(prompt).await?;

        let mut output: EnrichmentOutput = serde_json::from_str(&content)
            .map_err(|e| IntelError::Enrichment(format!("invalid enrichment schema: {e}")))?;
        validate_output(&output, sections, &self.config)?;
        output.summary = trim_text(&output.summary, self.config.summary_max_chars);

        Ok((
            output,
            EnrichmentMeta {
                model: self.config.model.clone(),
                prompt_version: PROMPT_VERSION,
                token_usage,
            },
        ))
    }

    async fn call_llm(
        &self,
        prompt: String,
    ) -> Result<(String, Option<serde_json::Value>), IntelError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            temperature: 0.2,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        debug!(model = %self.config.model, "enrichment chat request");

        let response = self
            .client
            .post(&self.config.api_base)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    IntelError::Timeout(self.config.timeout_s)
                } else {
                    IntelError::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(IntelError::Enrichment(format!(
                "chat api error ({status}): {error_text}"
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| IntelError::Enrichment(format!("invalid chat response: {e}")))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| IntelError::Enrichment("no content in chat response".to_string()))?;

        Ok((content, chat.usage))
    }
}

/// Serialize the user prompt: title, url, trimmed sections, and the caps the
/// model is asked to respect.
fn build_prompt(
    title: Option<&str>,
    url: &str,
    sections: &[Section],
    config: &EnrichConfig,
) -> String {
    let section_blocks: Vec<serde_json::Value> = sections
        .iter()
        .map(|section| {
            serde_json::json!({
                "section_id": section.section_id,
                "content": trim_text(&section.content, config.section_prompt_chars),
            })
        })
        .collect();

    serde_json::json!({
        "title": title.unwrap_or(""),
        "url": url,
        "sections": section_blocks,
        "instructions": {
            "summary_max_chars": config.summary_max_chars,
            "signals_max": config.signals_max,
            "signal_field_max_chars": config.signal_max_chars,
            "supporting_snippet_max_chars": config.snippet_max_chars,
        },
    })
    .to_string()
}

/// Enforce the caps and the grounding contract. The first violation wins.
fn validate_output(
    output: &EnrichmentOutput,
    sections: &[Section],
    config: &EnrichConfig,
) -> Result<(), IntelError> {
    if output.summary.chars().count() > config.summary_max_chars {
        return Err(IntelError::Enrichment("summary too long".to_string()));
    }
    if output.signals.len() > config.signals_max {
        return Err(IntelError::Enrichment("too many signals".to_string()));
    }

    for signal in &output.signals {
        if signal.claim.chars().count() > config.signal_max_chars
            || signal.why.chars().count() > config.signal_max_chars
        {
            return Err(IntelError::Enrichment("signal field too long".to_string()));
        }
        if let Some(tradeoff) = &signal.tradeoff {
            if tradeoff.chars().count() > config.signal_max_chars {
                return Err(IntelError::Enrichment("tradeoff too long".to_string()));
            }
        }
        if signal.supporting_snippet.chars().count() > config.snippet_max_chars {
            return Err(IntelError::Enrichment(
                "supporting_snippet too long".to_string(),
            ));
        }

        let section = sections
            .iter()
            .find(|s| s.section_id == signal.cite.section_id)
            .ok_or_else(|| {
                IntelError::Enrichment(format!("invalid section_id: {}", signal.cite.section_id))
            })?;
        if !section.content.contains(&signal.supporting_snippet) {
            return Err(IntelError::Enrichment(
                "supporting_snippet not found in section content".to_string(),
            ));
        }
    }

    Ok(())
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
    use contextd_core::SectionRef;

    fn section(id: &str, content: &str) -> Section {
        Section {
            section_id: id.to_string(),
            heading: format!("Section {}", &id[1..]),
            content: content.to_string(),
            rank: id[1..].parse().unwrap(),
        }
    }

    fn signal(snippet: &str, cite: &str) -> Signal {
        Signal {
            claim: "Lead times stretched to forty weeks".to_string(),
            why: "Multiple buyers report the same delay".to_string(),
            tradeoff: None,
            supporting_snippet: snippet.to_string(),
            cite: SectionRef {
                section_id: cite.to_string(),
            },
        }
    }

    fn output(signals: Vec<Signal>) -> EnrichmentOutput {
        EnrichmentOutput {
            summary: "Accelerator lead times have stretched sharply.".to_string(),
            signals,
            topics: vec!["ai".to_string()],
            freshness_half_life_days: Some(30),
        }
    }

    fn config() -> EnrichConfig {
        EnrichConfig::default()
    }

    #[test]
    fn prompt_carries_sections_and_instructions() {
        let sections = vec![section("s01", "Signal snippet here."), section("s02", "More.")];
        let prompt = build_prompt(Some("A title"), "https://example.com/a", &sections, &config());
        let value: serde_json::Value = serde_json::from_str(&prompt).unwrap();
        assert_eq!(value["title"], "A title");
        assert_eq!(value["sections"][0]["section_id"], "s01");
        assert_eq!(value["sections"][0]["content"], "Signal snippet here.");
        assert_eq!(value["instructions"]["summary_max_chars"], 900);
        assert_eq!(value["instructions"]["signals_max"], 8);
    }

    #[test]
    fn prompt_trims_long_sections_with_ellipsis() {
        let long = "a".repeat(5000);
        let sections = vec![section("s01", &long)];
        let prompt = build_prompt(None, "https://example.com/a", &sections, &config());
        let value: serde_json::Value = serde_json::from_str(&prompt).unwrap();
        let content = value["sections"][0]["content"].as_str().unwrap();
        assert_eq!(content.chars().count(), 2000);
        assert!(content.ends_with("..."));
    }

    #[test]
    fn valid_output_passes() {
        let sections = vec![section("s01", "Signal snippet here. And more words.")];
        let out = output(vec![signal("Signal snippet here.", "s01")]);
        assert!(validate_output(&out, &sections, &config()).is_ok());
    }

    #[test]
    fn summary_over_cap_is_rejected() {
        let sections = vec![section("s01", "Signal snippet here.")];
        let mut out = output(vec![signal("Signal snippet here.", "s01")]);
        out.summary = "s".repeat(901);
        let err = validate_output(&out, &sections, &config()).unwrap_err();
        assert!(err.to_string().contains("summary too long"));
    }

    #[test]
    fn too_many_signals_rejected() {
        let sections = vec![section("s01", "Signal snippet here.")];
        let out = output(vec![signal("Signal snippet here.", "s01"); 9]);
        let err = validate_output(&out, &sections, &config()).unwrap_err();
        assert!(err.to_string().contains("too many signals"));
    }

    #[test]
    fn oversized_snippet_rejected() {
        let long = "b".repeat(250);
        let sections = vec![section("s01", &long)];
        let out = output(vec![signal(&long, "s01")]);
        let err = validate_output(&out, &sections, &config()).unwrap_err();
        assert!(err.to_string().contains("supporting_snippet too long"));
    }

    #[test]
    fn unknown_cite_rejected() {
        let sections = vec![section("s01", "Signal snippet here.")];
        let out = output(vec![signal("Signal snippet here.", "s09")]);
        let err = validate_output(&out, &sections, &config()).unwrap_err();
        assert!(err.to_string().contains("invalid section_id: s09"));
    }

    #[test]
    fn ungrounded_snippet_rejected() {
        let sections = vec![section("s01", "Entirely different content.")];
        let out = output(vec![signal("Signal snippet here.", "s01")]);
        let err = validate_output(&out, &sections, &config()).unwrap_err();
        assert!(err
            .to_string()
            .contains("supporting_snippet not found in section content"));
    }

    #[test]
    fn schema_rejects_unknown_fields() {
        let raw = serde_json::json!({
            "summary": "ok",
            "signals": [],
            "topics": [],
            "hallucinated_field": true,
        });
        let parsed: Result<EnrichmentOutput, _> = serde_json::from_value(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn schema_requires_cite_pointer() {
        let raw = serde_json::json!({
            "summary": "Summary",
            "signals": [{
                "claim": "Claim",
                "why": "Why",
                "supporting_snippet": "Snippet",
            }],
            "topics": ["ai"],
        });
        let parsed: Result<EnrichmentOutput, _> = serde_json::from_value(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn trim_text_appends_ellipsis_only_on_cut() {
        assert_eq!(trim_text("short", 10), "short");
        let trimmed = trim_text(&"x".repeat(20), 10);
        assert_eq!(trimmed.chars().count(), 10);
        assert!(trimmed.ends_with("..."));
        assert_eq!(trim_text("anything", 0), "");
    }
}
