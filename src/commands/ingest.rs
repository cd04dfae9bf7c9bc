use anyhow::Result;

use contextd_core::{canonicalize, compute_article_id, AppConfig, JobStatus};
use contextd_storage::Storage;

pub async fn run(
    config: AppConfig,
    urls_arg: String,
    topics: Option<Vec<String>>,
    tags: Option<Vec<String>>,
    no_enrich: bool,
    force_refetch: bool,
) -> Result<()> {
    let urls: Vec<String> = if std::path::Path::new(&urls_arg).exists() {
        std::fs::read_to_string(&urls_arg)?
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    } else {
        urls_arg
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };

    let storage = Storage::new(&config.database.postgres_url).await?;
    storage.run_migrations().await?;

    let enrich = !no_enrich && config.enrich.enabled;
    let job_status = if enrich {
        JobStatus::Queued
    } else {
        JobStatus::QueuedNoEnrich
    };

    let mut queued = 0usize;
    for url in &urls {
        let canonical = canonicalize(url);
        let article_id = match compute_article_id(&canonical) {
            Ok(id) => id,
            Err(e) => {
                println!("  failed  {url}: {e}");
                continue;
            }
        };

        storage
            .seed_article(
                &article_id,
                &canonical,
                Some(url),
                topics.as_deref(),
                tags.as_deref(),
                force_refetch,
            )
            .await?;
        let job_id = storage
            .create_job(url, &canonical, &article_id, job_status)
            .await?;

        println!("  queued  {url} -> {article_id} (job {job_id})");
        queued += 1;
    }

    println!("\n{queued} of {} urls queued", urls.len());
    Ok(())
}
