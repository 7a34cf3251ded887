//! Shared HTTP transport for connectors.
//!
//! Requests are retried with exponential backoff on transient failures
//! (connection errors, timeouts, HTTP 5xx and 429). Any other 4xx response
//! fails immediately. Exhausting the retry budget yields
//! [`FetchError::RetriesExhausted`].

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::telemetry::CONNECTOR_FETCH_RETRIES_TOTAL;

/// Typed transport failure raised once a request cannot succeed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} was rejected with HTTP {status}: {body}")]
    Rejected {
        url: String,
        status: u16,
        body: String,
    },
    #[error("fetch failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum AttemptError {
    /// Worth retrying.
    Transient(String),
    /// Retrying cannot help.
    Permanent(FetchError),
}

/// Retry budget and delay schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): base, 2*base, 4*base ... capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails permanently or the budget runs out.
///
/// The closure receives the 1-based attempt number.
pub async fn retry_with_backoff<F, Fut, T>(
    connector: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Permanent(err)) => return Err(err),
            Err(AttemptError::Transient(reason)) => {
                if attempt >= max_attempts {
                    warn!(
                        connector,
                        attempts = attempt,
                        error = %reason,
                        "Fetch retries exhausted"
                    );
                    return Err(FetchError::RetriesExhausted {
                        attempts: attempt,
                        last_error: reason,
                    });
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    connector,
                    attempt,
                    error = %reason,
                    delay_ms = delay.as_millis() as u64,
                    "Transient fetch failure, retrying"
                );
                counter!(CONNECTOR_FETCH_RETRIES_TOTAL, "connector" => connector.to_string())
                    .increment(1);

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// HTTP client bound to one connector's retry policy.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    policy: RetryPolicy,
    connector: String,
}

impl HttpFetcher {
    pub fn new(connector: &str, timeout: Duration, policy: RetryPolicy) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("billing-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            client,
            policy,
            connector: connector.to_string(),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET `url` and return the body as text.
    pub async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        retry_with_backoff(&self.connector, &self.policy, |attempt| {
            self.get_once(url, attempt)
        })
        .await
    }

    /// GET `url` and decode the body as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, FetchError> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Decode {
            url: redact_url(url),
            reason: e.to_string(),
        })
    }

    async fn get_once(&self, url: &Url, attempt: u32) -> Result<String, AttemptError> {
        debug!(connector = %self.connector, attempt, url = %redact_url(url), "Fetching");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AttemptError::Transient(e.without_url().to_string()))?;

        let status = response.status();
        if is_transient_status(status) {
            return Err(AttemptError::Transient(format!("HTTP {}", status.as_u16())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AttemptError::Transient(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(AttemptError::Permanent(FetchError::Rejected {
                url: redact_url(url),
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            }));
        }

        Ok(body)
    }
}

/// Strip the query string and any path segment that looks like a token.
///
/// Some bank APIs carry the token in the path, so only the host and the
/// first path segment are kept.
pub fn redact_url(url: &Url) -> String {
    let first_segment = url
        .path_segments()
        .and_then(|mut segments| segments.next())
        .unwrap_or_default();
    format!(
        "{}://{}/{}",
        url.scheme(),
        url.host_str().unwrap_or_default(),
        first_segment
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn delays_double_from_the_base_and_are_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
        assert_eq!(policy.delay_for(64), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff("test", &fast_policy(3), |attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(AttemptError::Transient("HTTP 503".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.expect("third attempt succeeds"), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausting_the_budget_is_a_typed_error() {
        let result: Result<(), FetchError> = retry_with_backoff("test", &fast_policy(3), |_| async {
            Err(AttemptError::Transient("connection refused".to_string()))
        })
        .await;

        match result {
            Err(FetchError::RetriesExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "connection refused");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), FetchError> = retry_with_backoff("test", &fast_policy(5), |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AttemptError::Permanent(FetchError::Rejected {
                    url: "https://bank.test/v1".to_string(),
                    status: 401,
                    body: "unauthorized".to_string(),
                }))
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(FetchError::Rejected { status: 401, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn redact_url_drops_tokens_and_queries() {
        let url = Url::parse("https://bank.test/v1/rest/periods/SECRET/2026-01-01/x.json?k=v")
            .expect("valid url");
        assert_eq!(redact_url(&url), "https://bank.test/v1");
    }
}
