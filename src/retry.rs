//! Bounded retry with per-request timeout for outbound HTTP calls.
//!
//! All external services (embedding APIs, Elasticsearch, generation APIs)
//! go through [`send_with_retry`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Network errors (including timeouts) → retry
//! - Anything else is returned to the caller as-is
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Requests that must not run twice (creating a prediction) go through
//! [`send_create_with_retry`] instead, which only retries when the server
//! cannot have acted on the request: 429 and connection failures.

use anyhow::{bail, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Per-request timeout applied to the HTTP client.
    pub timeout: Duration,
    /// First backoff delay; doubles on each retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, timeout: Duration) -> Self {
        Self {
            max_retries,
            timeout,
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt.saturating_sub(1)).min(5))
    }

    /// Build a client whose requests time out after [`RetryPolicy::timeout`].
    pub fn client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(self.timeout).build()?)
    }
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

/// Which failures may be replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    /// Idempotent request: any transient failure.
    Transient,
    /// The request never reached the server, or was refused outright.
    Unprocessed,
}

impl Replay {
    fn status(self, status: reqwest::StatusCode) -> bool {
        match self {
            Replay::Transient => is_retryable(status),
            Replay::Unprocessed => status.as_u16() == 429,
        }
    }

    fn error(self, err: &reqwest::Error) -> bool {
        match self {
            Replay::Transient => true,
            Replay::Unprocessed => err.is_connect(),
        }
    }
}

/// Send the request produced by `build`, retrying transient failures.
///
/// `build` is called once per attempt because a `RequestBuilder` is
/// consumed by `send`. Non-retryable responses (2xx, 3xx, 4xx other than
/// 429) are returned unchanged so callers can interpret e.g. a 404.
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    service: &str,
    build: F,
) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    send(policy, service, Replay::Transient, build).await
}

/// Like [`send_with_retry`] for requests with side effects.
///
/// Only 429 and connection errors are retried. A 5xx or a timeout after
/// the request was sent is returned as-is (5xx) or as an error (timeout).
pub async fn send_create_with_retry<F>(
    policy: &RetryPolicy,
    service: &str,
    build: F,
) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    send(policy, service, Replay::Unprocessed, build).await
}

async fn send<F>(
    policy: &RetryPolicy,
    service: &str,
    replay: Replay,
    mut build: F,
) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.backoff(attempt);
            tracing::warn!(service, attempt, delay_ms = delay.as_millis() as u64, "retrying request");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if !replay.status(status) {
                    return Ok(response);
                }
                let body_text = response.text().await.unwrap_or_default();
                last_err = Some(anyhow::anyhow!(
                    "{} error {}: {}",
                    service,
                    status,
                    body_text
                ));
            }
            Err(e) => {
                let retry = replay.error(&e);
                let err = anyhow::anyhow!("{} request failed: {}", service, e);
                if !retry {
                    return Err(err);
                }
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", service)))
}

/// Turn a non-success response into an error carrying the response body.
pub async fn ensure_success(response: reqwest::Response, service: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body_text = response.text().await.unwrap_or_default();
    bail!("{} error {}: {}", service, status, body_text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_secs(5));
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(6), Duration::from_secs(32));
        assert_eq!(policy.backoff(9), Duration::from_secs(32));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(reqwest::StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(reqwest::StatusCode::NOT_FOUND));
        assert!(!is_retryable(reqwest::StatusCode::OK));
    }

    #[test]
    fn test_create_requests_only_replay_rate_limits() {
        let replay = Replay::Unprocessed;
        assert!(replay.status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(!replay.status(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!replay.status(reqwest::StatusCode::GATEWAY_TIMEOUT));
        assert!(Replay::Transient.status(reqwest::StatusCode::GATEWAY_TIMEOUT));
    }

    #[tokio::test]
    async fn test_network_error_exhausts_retries() {
        let policy = RetryPolicy::new(1, Duration::from_millis(200))
            .with_base_delay(Duration::from_millis(1));
        let client = policy.client().unwrap();
        // Port 9 (discard) on localhost is almost never listening.
        let err = send_with_retry(&policy, "test", || client.get("http://127.0.0.1:9/"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("test request failed"));
    }
}
