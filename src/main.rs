mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use contextd_core::AppConfig;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str)?;
    apply_env_overrides(&mut config);

    match cli.command {
        Commands::Serve { bind } => {
            commands::serve::run(config, bind).await?;
        }
        Commands::Worker {
            once,
            sleep_seconds,
        } => {
            commands::worker::run(config, once, sleep_seconds).await?;
        }
        Commands::Ingest {
            urls,
            topics,
            tags,
            no_enrich,
            force_refetch,
        } => {
            commands::ingest::run(config, urls, topics, tags, no_enrich, force_refetch).await?;
        }
        Commands::Pack {
            query,
            max_items,
            token_budget,
        } => {
            commands::pack::run(config, query, max_items, token_budget).await?;
        }
        Commands::Status => {
            commands::status::run(config).await?;
        }
    }

    Ok(())
}

/// Environment overrides on top of the config file. The INTEL_* names and
/// their defaults are part of the deployment contract.
fn apply_env_overrides(config: &mut AppConfig) {
    fn usize_var(name: &str) -> Option<usize> {
        std::env::var(name).ok().and_then(|v| v.parse().ok())
    }
    fn u64_var(name: &str) -> Option<u64> {
        std::env::var(name).ok().and_then(|v| v.parse().ok())
    }

    if let Ok(v) = std::env::var("DATABASE_URL") {
        config.database.postgres_url = v;
    }
    if let Ok(v) = std::env::var("CONTEXT_API_TOKEN") {
        config.api.bearer_token = v;
    }
    if let Ok(v) = std::env::var("CONTEXT_API_BIND") {
        config.api.bind_addr = v;
    }

    if let Some(n) = usize_var("INTEL_FETCH_MAX_BYTES") {
        config.fetch.max_bytes = n;
    }
    if let Some(n) = u64_var("INTEL_FETCH_TIMEOUT_S") {
        config.fetch.timeout_s = n;
    }
    if let Some(n) = u64_var("INTEL_HOST_THROTTLE_MS") {
        config.fetch.host_throttle_ms = n;
    }
    if let Ok(v) = std::env::var("INTEL_USER_AGENT") {
        config.fetch.user_agent = v;
    }
    if let Some(n) = usize_var("INTEL_EXTRACT_MAX_CHARS") {
        config.extract.max_chars = n;
    }

    if let Some(n) = usize_var("INTEL_SECTION_PROMPT_CHARS") {
        config.enrich.section_prompt_chars = n;
    }
    if let Some(n) = usize_var("INTEL_SUMMARY_MAX_CHARS") {
        config.enrich.summary_max_chars = n;
    }
    if let Some(n) = usize_var("INTEL_SIGNALS_MAX") {
        config.enrich.signals_max = n;
    }
    if let Some(n) = usize_var("INTEL_SIGNAL_MAX_CHARS") {
        config.enrich.signal_max_chars = n;
    }
    if let Some(n) = usize_var("INTEL_SNIPPET_MAX_CHARS") {
        config.enrich.snippet_max_chars = n;
    }
    if let Ok(v) = std::env::var("OPENAI_API_BASE") {
        config.enrich.api_base = v;
    }
    if let Ok(v) = std::env::var("OPENAI_API_KEY") {
        config.enrich.api_key = v;
    }
    if let Ok(v) = std::env::var("OPENAI_MODEL") {
        config.enrich.model = v;
    }
    if let Ok(v) = std::env::var("INTEL_ENRICH") {
        config.enrich.enabled = v != "0" && v.to_lowercase() != "false";
    }
}
