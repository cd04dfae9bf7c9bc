use thiserror::Error;

/// Pipeline error kinds. The `Display` strings of the fetch/extract variants
/// double as job `last_error` values, so their wording is load-bearing.
#[derive(Error, Debug)]
pub enum IntelError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("http_status_{0}")]
    HttpStatus(u16),

    #[error("empty html")]
    EmptyHtml,

    #[error("empty extracted text")]
    EmptyText,

    #[error("missing job data")]
    MissingJobData,

    #[error("enrichment error: {0}")]
    Enrichment(String),
}
