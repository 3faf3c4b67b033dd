//! Shared request loop for HTTP-backed providers.
//!
//! Every provider (embeddings, re-ranker, chat) posts JSON and retries the
//! same way:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use tabula_core::error::{Error, Result};

pub fn client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(Error::provider)
}

/// Read a bearer token from the environment. Missing or empty is `None`.
pub fn api_key(env_var: &str) -> Option<String> {
    std::env::var(env_var).ok().filter(|k| !k.is_empty())
}

/// POST `body` to `url`, retrying transient failures, and return the
/// successful response unread.
pub async fn send_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<reqwest::Response> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider = label, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(Error::Provider(format!(
                        "{} API error {}: {}",
                        label, status, body_text
                    )));
                    continue;
                }

                return Err(Error::Provider(format!(
                    "{} API error {}: {}",
                    label, status, body_text
                )));
            }
            Err(e) => {
                last_err = Some(Error::Provider(format!("{} request failed: {}", label, e)));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| Error::Provider(format!("{} request failed after retries", label))))
}

/// [`send_with_retry`] and decode the JSON body.
pub async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let response = send_with_retry(client, url, bearer, body, max_retries, label).await?;
    response
        .json()
        .await
        .map_err(|e| Error::Provider(format!("{} returned invalid JSON: {}", label, e)))
}
