use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "contextd", about = "Article intel pipeline & context pack service")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        /// Bind address, e.g. 0.0.0.0:8080
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Run the ingest worker loop
    Worker {
        /// Process one job and exit
        #[arg(long)]
        once: bool,

        /// Idle sleep between empty polls
        #[arg(long)]
        sleep_seconds: Option<u64>,
    },
    /// Seed articles and enqueue ingest jobs for URLs
    Ingest {
        /// URLs (comma-separated or a file path)
        #[arg(short, long)]
        urls: String,

        /// Topics applied to every seeded article
        #[arg(short, long, value_delimiter = ',')]
        topics: Option<Vec<String>>,

        /// Caller-supplied tags
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,

        /// Skip LLM enrichment for these jobs
        #[arg(long)]
        no_enrich: bool,

        /// Reset previously extracted/enriched fields
        #[arg(long)]
        force_refetch: bool,
    },
    /// Query a context pack and print it
    Pack {
        /// Natural-language query
        #[arg(short, long)]
        query: String,

        /// Maximum items in the pack
        #[arg(short, long)]
        max_items: Option<usize>,

        /// Token budget for the pack
        #[arg(long)]
        token_budget: Option<usize>,
    },
    /// Show connectivity and table counts
    Status,
}
