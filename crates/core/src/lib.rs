pub mod canonical;
pub mod config;
pub mod error;
pub mod types;

pub use canonical::{canonicalize, compute_article_id};
pub use config::AppConfig;
pub use error::IntelError;
pub use types::*;
