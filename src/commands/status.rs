use anyhow::Result;

use contextd_core::AppConfig;
use contextd_storage::Storage;

pub async fn run(config: AppConfig) -> Result<()> {
    let storage = Storage::new(&config.database.postgres_url).await?;

    match storage.check_connectivity().await {
        Ok(()) => println!("Database: connected"),
        Err(e) => {
            println!("Database: ERROR - {}", e);
            return Ok(());
        }
    }

    storage.run_migrations().await?;

    let articles = storage.article_count().await?;
    let sections = storage.section_count().await?;
    let jobs = storage.job_counts().await?;

    println!("Articles:  {}", articles);
    println!("Sections:  {}", sections);
    if jobs.is_empty() {
        println!("Jobs:      0");
    } else {
        println!("Jobs:");
        for (status, count) in jobs {
            println!("  {:<18} {}", status, count);
        }
    }

    Ok(())
}
