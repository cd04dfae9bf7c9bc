use std::sync::Arc;

use anyhow::Result;

use contextd_api::AppState;
use contextd_core::AppConfig;
use contextd_storage::Storage;

pub async fn run(config: AppConfig, bind: Option<String>) -> Result<()> {
    let storage = Storage::new(&config.database.postgres_url).await?;
    storage.run_migrations().await?;

    let bind_addr = bind.unwrap_or_else(|| config.api.bind_addr.clone());
    let state = Arc::new(AppState::new(storage, config.api.bearer_token.clone()));
    contextd_api::serve(state, &bind_addr).await
}
