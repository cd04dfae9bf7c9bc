use anyhow::Result;

use contextd_core::AppConfig;
use contextd_storage::Storage;
use contextd_worker::Worker;

pub async fn run(config: AppConfig, once: bool, sleep_seconds: Option<u64>) -> Result<()> {
    let storage = Storage::new(&config.database.postgres_url).await?;
    storage.run_migrations().await?;

    let sleep_seconds = sleep_seconds.unwrap_or(config.worker.sleep_seconds);
    let worker = Worker::new(
        storage,
        config.fetch.clone(),
        config.extract.clone(),
        config.enrich.clone(),
        sleep_seconds,
    )?;

    if once {
        let processed = worker.run_once().await?;
        if !processed {
            println!("queue empty, nothing to do");
        }
        return Ok(());
    }

    worker.run().await
}
