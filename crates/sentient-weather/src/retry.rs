//! Backoff and retry for the read-only lookups (geocoding, forecasts).
//!
//! Transient failures are retried: timeouts, refused or reset connections,
//! 5xx, 408 and 429. Anything else is returned to the caller on the first try.

use std::future::Future;
use std::time::Duration;

use reqwest::{Response, StatusCode};
use sentient_core::WeatherConfig;

const DEFAULT_RETRIES: u32 = 5;
const DEFAULT_BACKOFF_MS: u64 = 200;
const BACKOFF_CAP_MS: u64 = 5000;

/// How often and how patiently to retry a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Wait before the first retry; doubled for each one after
    pub backoff: Duration,
    /// Longest single wait
    pub backoff_cap: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_RETRIES, DEFAULT_BACKOFF_MS, BACKOFF_CAP_MS)
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, backoff_ms: u64, backoff_cap_ms: u64) -> Self {
        Self {
            max_retries,
            backoff: Duration::from_millis(backoff_ms),
            backoff_cap: Duration::from_millis(backoff_cap_ms),
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    pub fn from_config(config: &WeatherConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_backoff_ms, BACKOFF_CAP_MS)
    }

    /// Wait before retry number `retry` (1-based).
    pub fn delay_before(&self, retry: u32) -> Duration {
        let doublings = retry.saturating_sub(1).min(31);
        self.backoff
            .saturating_mul(1u32 << doublings)
            .min(self.backoff_cap)
    }
}

/// 5xx, 408 Request Timeout and 429 Too Many Requests.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Timeouts and connection failures. Malformed requests and body decoding
/// errors are not worth repeating.
pub fn is_transient_error(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }
    error.status().is_some_and(is_transient_status)
}

/// Send a request built by `send`, retrying transient failures.
///
/// Returns the first response with a non-transient status, the last
/// response once retries run out, or the error that ended the attempts.
pub async fn with_retry<F, Fut>(config: &RetryConfig, send: F) -> Result<Response, reqwest::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Response, reqwest::Error>>,
{
    let mut retry = 0;

    loop {
        let last_chance = retry >= config.max_retries;
        let outcome = send().await;

        let reason = match &outcome {
            Ok(response) if is_transient_status(response.status()) => {
                Some(format!("HTTP {}", response.status()))
            }
            Err(e) if is_transient_error(e) => Some(e.to_string()),
            _ => None,
        };

        let Some(reason) = reason.filter(|_| !last_chance) else {
            if retry > 0 {
                tracing::debug!("Lookup settled after {} retries", retry);
            }
            return outcome;
        };

        retry += 1;
        let delay = config.delay_before(retry);
        tracing::warn!(
            "Transient failure ({}), retry {}/{} in {:?}",
            reason,
            retry,
            config.max_retries,
            delay
        );
        tokio::time::sleep(delay).await;
    }
}
