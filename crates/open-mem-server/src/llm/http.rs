// crates/open-mem-server/src/llm/http.rs
// Shared HTTP client and retry discipline for all provider adapters

use crate::utils::CancelToken;
use anyhow::{Result, anyhow};
use reqwest::Client;
use std::time::Duration;
use tracing::warn;

/// Default maximum retry attempts for transient failures
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base backoff duration between retries (doubles each attempt)
const DEFAULT_BASE_BACKOFF_MS: u64 = 500;
/// Backoff ceiling; a single wait never exceeds this
const MAX_BACKOFF_SECS: u64 = 30;
/// Request timeout
const REQUEST_TIMEOUT_SECS: u64 = 120;
/// Connect timeout
const CONNECT_TIMEOUT_SECS: u64 = 15;

/// Classify an HTTP status + body as retryable.
///
/// Retryable: 429, 500, 503 (and other 5xx), and provider "overloaded"
/// bodies. Everything else surfaces immediately.
pub fn is_retryable_status(status: reqwest::StatusCode, body: &str) -> bool {
    if status.as_u16() == 429 || status.is_server_error() {
        return true;
    }
    body.to_lowercase().contains("overloaded")
}

/// Shared HTTP client for provider adapters, with retry + cancellation.
pub struct LlmHttpClient {
    client: Client,
    max_attempts: u32,
    base_backoff: Duration,
}

impl Default for LlmHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmHttpClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
        }
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// POST a JSON body with retry on transient failures.
    ///
    /// `headers` carries provider-specific auth (x-goog-api-key, x-api-key +
    /// anthropic-version, Bearer). Returns the response body text. An
    /// aborted token short-circuits the loop and fails non-retryably.
    pub async fn post_json_with_retry(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: serde_json::Value,
        cancel: &CancelToken,
    ) -> Result<String> {
        let payload = serde_json::to_string(&body)?;
        let mut backoff = self.base_backoff;

        for attempt in 0..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(anyhow!("request aborted"));
            }

            let mut request = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .body(payload.clone());
            for (name, value) in headers {
                request = request.header(*name, value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.text().await?);
                    }

                    let error_body = response.text().await.unwrap_or_default();
                    if attempt < self.max_attempts && is_retryable_status(status, &error_body) {
                        warn!(
                            status = %status,
                            "transient provider error, retrying in {:?}",
                            backoff
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(MAX_BACKOFF_SECS));
                        continue;
                    }
                    return Err(anyhow!("API error {}: {}", status, error_body));
                }
                Err(e) => {
                    // Connection-level failures are transient by nature
                    if attempt < self.max_attempts {
                        warn!(error = %e, "request failed, retrying in {:?}", backoff);
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(MAX_BACKOFF_SECS));
                        continue;
                    }
                    return Err(anyhow!("request failed after retries: {}", e));
                }
            }
        }

        Err(anyhow!("retry loop exhausted"))
    }
}
