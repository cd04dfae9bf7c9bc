mod auth;
mod error;
mod fixtures;
mod handlers;
mod models;

use std::sync::Arc;

use anyhow::Result;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use contextd_retrieval::Retriever;
use contextd_storage::Storage;

pub use error::ApiError;

pub struct AppState {
    pub storage: Storage,
    pub retriever: Retriever,
    pub bearer_token: String,
}

impl AppState {
    pub fn new(storage: Storage, bearer_token: String) -> Self {
        let retriever = Retriever::new(storage.clone());
        Self {
            storage,
            retriever,
            bearer_token,
        }
    }
}

/// Build the HTTP surface: `/health` is open, everything under `/v2` sits
/// behind the bearer-token gate.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v2/intel/ingest_urls", post(handlers::ingest_urls))
        .route("/v2/intel/ingest", post(handlers::ingest_fixtures))
        .route("/v2/context/pack", post(handlers::context_pack))
        .route("/v2/intel/articles/{article_id}", get(handlers::article_status))
        .route(
            "/v2/intel/articles/{article_id}/outline",
            get(handlers::article_outline),
        )
        .route(
            "/v2/intel/articles/{article_id}/sections",
            post(handlers::article_sections),
        )
        .route(
            "/v2/intel/articles/{article_id}/chunks:search",
            post(handlers::chunks_search),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, bind_addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = bind_addr, "api listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
