//! # HTTP Fetch Client
//!
//! Issues GET requests against the upstream API and turns responses into JSON
//! documents.
//!
//! ## Failure classes
//! - **4xx**: the request itself is wrong; surfaced as [`FetchError::NotFound`]
//!   immediately, never retried
//! - **5xx, timeouts, connection failures**: transient; retried with
//!   exponential back-off and surfaced as [`FetchError::Upstream`] once the
//!   [`RetryPolicy`] is exhausted
//! - **any other non-2xx status** (1xx, an unfollowed 3xx): surfaced as
//!   [`FetchError::Upstream`] without retrying
//! - **2xx with a body that is not JSON**: [`FetchError::Decode`], not retried

use super::retry::{RetryPolicy, RetryState};
use crate::caching::FetchRequest;
use crate::core::config::FetchConfig;
use crate::core::error::{ConfigError, FetchError, FetchResult};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Sent with every upstream request
const USER_AGENT: &str = concat!("pokefetch/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error body kept in error messages
const MAX_ERROR_BODY: usize = 200;

/// HTTP client for the upstream API
pub struct HttpFetchClient {
    /// Underlying HTTP client, carries the per-attempt timeout
    http: reqwest::Client,

    /// Root every request path is resolved against
    base_url: Url,

    /// Retry strategy for transient failures
    policy: RetryPolicy,

    /// Requests actually sent, retries included
    attempts: AtomicU64,
}

impl HttpFetchClient {
    /// Create a client from configuration
    pub fn new(config: &FetchConfig) -> Result<Self, ConfigError> {
        Self::with_policy(
            &config.base_url,
            config.request_timeout,
            RetryPolicy::from(&config.retry),
        )
    }

    /// Create a client with an explicit retry policy
    pub fn with_policy(
        base_url: &str,
        request_timeout: Duration,
        policy: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ConfigError::invalid("base_url", format!("{}: {}", base_url, e)))?;

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConfigError::invalid("request_timeout", e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            policy,
            attempts: AtomicU64::new(0),
        })
    }

    /// Root URL of the upstream API
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Retry policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Number of HTTP requests sent so far, retries included
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Resolve a request against the base URL
    pub fn build_url(&self, request: &FetchRequest) -> FetchResult<Url> {
        let path = request.normalized_path()?;
        let query = request.normalized_query()?;

        let mut url = self.base_url.clone();
        url.set_path(&format!("{}/{}", self.base_url.path().trim_end_matches('/'), path));

        if query.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(query.iter());
        }

        Ok(url)
    }

    /// Fetch one document, retrying transient failures
    pub async fn fetch(&self, request: &FetchRequest) -> FetchResult<Value> {
        let url = self.build_url(request)?;
        let path = request.normalized_path()?;
        let mut state = RetryState::new();

        loop {
            let error = match self.attempt(&url, &path).await {
                Ok(document) => return Ok(document),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            match state.next_backoff(&self.policy) {
                Some(delay) => {
                    warn!(
                        url = %url,
                        attempt = state.attempt,
                        max_attempts = self.policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "upstream request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        url = %url,
                        attempts = state.attempt,
                        error = %error,
                        "upstream request failed, giving up"
                    );
                    return Err(exhausted(error, state.attempt));
                }
            }
        }
    }

    /// A single GET round-trip
    async fn attempt(&self, url: &Url, path: &str) -> FetchResult<Value> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        debug!("GET {}", url);

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();

        if status.is_client_error() {
            return Err(FetchError::not_found(status.as_u16(), path));
        }

        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::upstream(Some(status.as_u16()), error_message(status, &body)));
        }

        // 1xx or a 3xx reqwest did not follow; not transient, so not retried
        if !status.is_success() {
            return Err(FetchError::upstream(
                Some(status.as_u16()),
                format!("unexpected status {} for {}", status, path),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::upstream(Some(status.as_u16()), format!("failed to read body: {}", e)))?;

        serde_json::from_slice(&body).map_err(|e| {
            FetchError::decode(format!("response for {} is not valid JSON: {}", path, e))
        })
    }
}

/// Classify a reqwest failure that happened before a status was received
fn transport_error(error: reqwest::Error) -> FetchError {
    let message = if error.is_timeout() {
        format!("request timed out: {}", error)
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        error.to_string()
    };

    FetchError::upstream(None, message)
}

fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return status.to_string();
    }

    let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
    format!("{}: {}", status, snippet)
}

/// Final error once the retry budget is spent
fn exhausted(error: FetchError, attempts: u32) -> FetchError {
    match error {
        FetchError::Upstream { status, message } => {
            FetchError::upstream(status, format!("{} (after {} attempts)", message, attempts))
        }
        other => other,
    }
}
