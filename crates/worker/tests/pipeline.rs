//! Integration tests for the ingest pipeline.
//! Requires a Postgres instance. Set DATABASE_URL or these tests are skipped.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use contextd_core::config::{EnrichConfig, ExtractConfig, FetchConfig};
use contextd_core::{canonicalize, compute_article_id, JobStatus};
use contextd_storage::Storage;
use contextd_worker::Worker;

const ARTICLE_HTML: &str = r#"<html>
  <head><title>Sample Article</title></head>
  <body>
    <p>Signal snippet here.</p>
    <p>Second paragraph with more context.</p>
  </body>
</html>"#;

/// The tests share one database and one job queue, so they take turns.
static DB_LOCK: Mutex<()> = Mutex::const_new(());

fn database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Drain the queue with this worker. Stale jobs from earlier runs point at
/// dead fixture ports and fail fast; ours gets processed along the way.
async fn drain_queue(worker: &Worker) {
    while worker.run_once().await.unwrap() {}
}

/// Minimal one-response-per-connection HTTP server for fixtures and for the
/// mocked chat-completions endpoint.
async fn spawn_http_server(body: String, content_type: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 16384];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

fn chat_completion_body(content: &serde_json::Value) -> String {
    serde_json::json!({
        "choices": [{"message": {"content": content.to_string()}}],
        "usage": {"total_tokens": 42},
    })
    .to_string()
}

fn enrich_config(api_base: String) -> EnrichConfig {
    EnrichConfig {
        api_base,
        api_key: "test-key".to_string(),
        ..EnrichConfig::default()
    }
}

fn fetch_config() -> FetchConfig {
    FetchConfig {
        host_throttle_ms: 0,
        ..FetchConfig::default()
    }
}

async fn seed_and_enqueue(storage: &Storage, url: &str) -> String {
    let canonical = canonicalize(url);
    let article_id = compute_article_id(&canonical).unwrap();
    storage
        .seed_article(&article_id, &canonical, Some(url), Some(&["ai".to_string()]), None, false)
        .await
        .unwrap();
    storage
        .create_job(url, &canonical, &article_id, JobStatus::Queued)
        .await
        .unwrap();
    article_id
}

#[tokio::test]
async fn happy_path_enriches_article() {
    let Some(db) = database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let _guard = DB_LOCK.lock().await;

    let article_url = spawn_http_server(ARTICLE_HTML.to_string(), "text/html").await + "/article";
    let llm_content = serde_json::json!({
        "summary": "Summary of the sample article.",
        "signals": [{
            "claim": "Key claim",
            "why": "Reasoning based on the article.",
            "supporting_snippet": "Signal snippet here.",
            "cite": {"section_id": "s01"},
        }],
        "topics": ["ai"],
        "freshness_half_life_days": 30,
    });
    let llm_url = spawn_http_server(chat_completion_body(&llm_content), "application/json").await;

    let storage = Storage::new(&db).await.unwrap();
    storage.run_migrations().await.unwrap();
    let article_id = seed_and_enqueue(&storage, &article_url).await;

    let worker = Worker::new(
        storage.clone(),
        fetch_config(),
        ExtractConfig::default(),
        enrich_config(llm_url),
        1,
    )
    .unwrap();

    drain_queue(&worker).await;

    let article = storage.get_article(&article_id).await.unwrap().unwrap();
    assert_eq!(article.status, "enriched");
    assert_eq!(article.summary, "Summary of the sample article.");
    assert!(article.extracted_text.is_some());
    assert!(article.signals.as_array().map(|s| !s.is_empty()).unwrap_or(false));
    assert!(article.outline.as_array().map(|o| !o.is_empty()).unwrap_or(false));

    let sections = storage
        .get_sections(&article_id, &["s01".to_string()])
        .await
        .unwrap();
    assert_eq!(sections.len(), 1);
    assert!(sections[0].content.contains("Signal snippet here."));
}

#[tokio::test]
async fn grounding_violation_leaves_partial_article() {
    let Some(db) = database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let _guard = DB_LOCK.lock().await;

    let article_url = spawn_http_server(ARTICLE_HTML.to_string(), "text/html").await + "/article";
    let llm_content = serde_json::json!({
        "summary": "Summary of the sample article.",
        "signals": [{
            "claim": "Key claim",
            "why": "Reasoning based on the article.",
            "supporting_snippet": "This snippet appears nowhere in the page.",
            "cite": {"section_id": "s01"},
        }],
        "topics": [],
    });
    let llm_url = spawn_http_server(chat_completion_body(&llm_content), "application/json").await;

    let storage = Storage::new(&db).await.unwrap();
    storage.run_migrations().await.unwrap();
    let article_id = seed_and_enqueue(&storage, &article_url).await;

    let worker = Worker::new(
        storage.clone(),
        fetch_config(),
        ExtractConfig::default(),
        enrich_config(llm_url),
        1,
    )
    .unwrap();

    drain_queue(&worker).await;

    let article = storage.get_article(&article_id).await.unwrap().unwrap();
    assert_eq!(article.status, "partial");
    assert_eq!(article.summary, "");
    assert!(article.extracted_text.is_some(), "extract survives enrichment failure");
    let last_error = storage.get_latest_job_error(&article_id).await.unwrap();
    assert!(last_error.unwrap().contains("supporting_snippet not found"));

    let sections = storage
        .get_sections(&article_id, &["s01".to_string()])
        .await
        .unwrap();
    assert!(!sections.is_empty(), "sections survive enrichment failure");
}

#[tokio::test]
async fn concurrent_claims_return_distinct_jobs() {
    let Some(db) = database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let _guard = DB_LOCK.lock().await;

    let storage = Storage::new(&db).await.unwrap();
    storage.run_migrations().await.unwrap();

    // Two fresh jobs against throwaway URLs; the claim query must hand them
    // to concurrent claimers without overlap.
    let unique = uuid::Uuid::new_v4();
    let first = seed_and_enqueue(&storage, &format!("https://claims.test/{unique}/a")).await;
    let second = seed_and_enqueue(&storage, &format!("https://claims.test/{unique}/b")).await;

    let (a, b) = tokio::join!(storage.claim_next_job(), storage.claim_next_job());
    let a = a.unwrap();
    let b = b.unwrap();

    match (a, b) {
        (Some(a), Some(b)) => {
            assert_ne!(a.job_id, b.job_id);
            assert!(a.attempts >= 1 && b.attempts >= 1);
        }
        (None, None) => panic!("both claims came back empty"),
        // One claim losing the race entirely is acceptable under SKIP LOCKED.
        _ => {}
    }

    // The seeded articles exist regardless of claim interleaving.
    assert!(storage.get_article(&first).await.unwrap().is_some());
    assert!(storage.get_article(&second).await.unwrap().is_some());
}
