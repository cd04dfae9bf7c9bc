use anyhow::Result;

use contextd_core::AppConfig;
use contextd_retrieval::{PackRequest, Retriever};
use contextd_storage::Storage;

pub async fn run(
    config: AppConfig,
    query: String,
    max_items: Option<usize>,
    token_budget: Option<usize>,
) -> Result<()> {
    let storage = Storage::new(&config.database.postgres_url).await?;
    let retriever = Retriever::new(storage);

    let response = retriever
        .context_pack(&PackRequest {
            query,
            topics: None,
            token_budget,
            recency_days: None,
            max_items,
        })
        .await?;

    println!(
        "Confidence: {} | next action: {} | trace {}\n",
        response.retrieval_confidence.as_str(),
        response.next_action.as_str(),
        response.trace.trace_id
    );

    for item in &response.pack.items {
        println!("  {} ({})", item.title, item.url);
        println!("    {}", item.summary);
        for signal in &item.signals {
            println!("    - {}", signal.claim);
            println!("      why: {}", signal.why);
            if let Some(tradeoff) = &signal.tradeoff {
                println!("      tradeoff: {tradeoff}");
            }
        }
        println!("    citations: {}", item.citations.len());
        println!();
    }

    if response.pack.items.is_empty() {
        println!("  (empty pack)");
    }

    Ok(())
}
