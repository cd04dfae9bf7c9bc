use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use reqwest::redirect::Policy;
use tracing::{debug, warn};
use url::Url;

use contextd_core::config::FetchConfig;
use contextd_core::{FetchResult, IntelError};

/// Bounded HTTP GET with per-host politeness.
///
/// Bodies are streamed and cut off at `max_bytes`; responses are decoded as
/// UTF-8 with undecodable bytes replaced. The throttle map is process-local:
/// two worker processes may exceed the polite interval for the same host.
pub struct PageFetcher {
    client: reqwest::Client,
    config: FetchConfig,
    host_last_request: DashMap<String, Instant>,
}

impl PageFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, IntelError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::limited(config.max_redirects))
            .timeout(Duration::from_secs(config.timeout_s))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| IntelError::Network(e.to_string()))?;

        Ok(Self {
            client,
            config,
            host_last_request: DashMap::new(),
        })
    }

    /// Sleep out the remainder of the polite interval since the last request
    /// to this host, then record the new timestamp.
    async fn throttle_host(&self, host: &str) {
        let throttle = Duration::from_millis(self.config.host_throttle_ms);
        if throttle.is_zero() {
            return;
        }
        let wait = self
            .host_last_request
            .get(host)
            .and_then(|last| throttle.checked_sub(last.elapsed()));
        if let Some(wait) = wait {
            if !wait.is_zero() {
                debug!(host, wait_ms = wait.as_millis() as u64, "host throttle");
                tokio::time::sleep(wait).await;
            }
        }
        self.host_last_request.insert(host.to_string(), Instant::now());
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchResult, IntelError> {
        let parsed =
            Url::parse(url).map_err(|e| IntelError::InvalidUrl(format!("{url}: {e}")))?;
        if let Some(host) = parsed.host_str() {
            self.throttle_host(host).await;
        }

        let mut resp = self.client.get(parsed.clone()).send().await.map_err(|e| {
            warn!(url = %parsed, error = %e, "fetch failed");
            self.map_reqwest_error(e)
        })?;

        let status_code = resp.status().as_u16();
        let final_url = resp.url().to_string();

        // Header names from the http crate are already lowercase.
        let mut headers = HashMap::new();
        for (k, v) in resp.headers() {
            if let Ok(val) = v.to_str() {
                headers.insert(k.as_str().to_string(), val.to_string());
            }
        }

        let mut body: Vec<u8> = Vec::new();
        let mut truncated = false;
        loop {
            let chunk = match resp.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => return Err(self.map_reqwest_error(e)),
            };
            if body.len() + chunk.len() > self.config.max_bytes {
                let remaining = self.config.max_bytes - body.len();
                body.extend_from_slice(&chunk[..remaining]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        let html = String::from_utf8_lossy(&body).into_owned();
        debug!(url = %parsed, status_code, bytes = body.len(), truncated, "fetched");

        Ok(FetchResult {
            final_url,
            status_code,
            headers,
            html,
            truncated,
        })
    }

    fn map_reqwest_error(&self, e: reqwest::Error) -> IntelError {
        if e.is_timeout() {
            IntelError::Timeout(self.config.timeout_s)
        } else {
            IntelError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher_with_throttle(ms: u64) -> PageFetcher {
        PageFetcher::new(FetchConfig {
            host_throttle_ms: ms,
            ..FetchConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn throttle_delays_second_request_to_same_host() {
        let fetcher = fetcher_with_throttle(60);
        fetcher.throttle_host("example.com").await;
        let start = Instant::now();
        fetcher.throttle_host("example.com").await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn throttle_does_not_delay_distinct_hosts() {
        let fetcher = fetcher_with_throttle(500);
        fetcher.throttle_host("a.example.com").await;
        let start = Instant::now();
        fetcher.throttle_host("b.example.com").await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn throttle_disabled_at_zero() {
        let fetcher = fetcher_with_throttle(0);
        fetcher.throttle_host("example.com").await;
        let start = Instant::now();
        fetcher.throttle_host("example.com").await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
