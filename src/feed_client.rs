use crate::errors::AppError;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Retry budget and timeout for one feed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay unit for the exponential backoff.
    pub base_delay: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given failed attempt (numbered from 1).
    ///
    /// `base_delay * 2^attempt`: with the defaults the first retry waits 1s
    /// and the second 2s.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Why a single attempt failed.
enum AttemptError {
    /// Worth another attempt.
    Transient(String),
    /// The request could not even be built; retrying would not help.
    Fatal(String),
}

/// HTTP client for the upstream JSON feeds.
#[derive(Clone)]
pub struct FeedClient {
    client: Client,
    policy: RetryPolicy,
}

impl FeedClient {
    /// Creates a new `FeedClient`.
    ///
    /// # Arguments
    ///
    /// * `policy` - Retry budget and per-request timeout.
    pub fn new(policy: RetryPolicy) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(policy.timeout)
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create feed client: {}", e)))?;

        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET `url` and decode the JSON body into `T`, retrying transient failures.
    ///
    /// Connection errors, timeouts, non-200 statuses and undecodable bodies are
    /// retried until `max_attempts` is reached; the last cause is returned in
    /// an `AppError::FetchError`.
    pub async fn fetch<T: DeserializeOwned>(&self, url: &str) -> Result<T, AppError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_cause = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt::<T>(url).await {
                Ok(payload) => {
                    if attempt > 1 {
                        tracing::info!("Fetched {} on attempt {}", url, attempt);
                    }
                    return Ok(payload);
                }
                Err(AttemptError::Fatal(cause)) => {
                    return Err(AppError::FetchError {
                        url: url.to_string(),
                        attempts: attempt,
                        cause,
                    });
                }
                Err(AttemptError::Transient(cause)) => {
                    if attempt < max_attempts {
                        let delay = self.policy.backoff(attempt);
                        tracing::warn!(
                            "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                            attempt,
                            max_attempts,
                            url,
                            cause,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_cause = cause;
                }
            }
        }

        Err(AppError::FetchError {
            url: url.to_string(),
            attempts: max_attempts,
            cause: last_cause,
        })
    }

    async fn attempt<T: DeserializeOwned>(&self, url: &str) -> Result<T, AttemptError> {
        tracing::debug!("GET {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                AttemptError::Fatal(format!("failed to create request: {}", e))
            } else {
                AttemptError::Transient(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(AttemptError::Transient(format!(
                "received non-200 status code: {}",
                status
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AttemptError::Transient(format!("failed to decode response: {}", e)))
    }
}
