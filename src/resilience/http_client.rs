//! HTTP client with per-request timeout, configurable retry/backoff and a
//! circuit-breaker gate. One instance serves one provider.
//!
//! Version dependencies:
//! - reqwest = "0.11"
//! - tokio-util = "0.7"
//! - metrics = "0.21"

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::circuit_breaker::CircuitBreaker;

/// Statuses worth retrying: rate limiting and transient server faults.
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Delay growth across attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// base, 2·base, 4·base, ...
    Exponential,
    /// base, 2·base, 3·base, ...
    Linear,
    /// base every time.
    Fixed,
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_strategy: RetryStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_status_codes: Vec<u16>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_strategy: RetryStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            retry_status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("circuit breaker open for '{0}', request blocked")]
    CircuitOpen(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("client build error: {0}")]
    Build(String),
}

impl ClientError {
    /// CircuitOpen means "provider skipped", not "provider failed".
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ClientError::CircuitOpen(_))
    }
}

/// One-provider GET client. The breaker is checked before any network
/// traffic; breaker bookkeeping follows the final outcome of the attempt
/// loop, never an individual retry.
#[derive(Debug, Clone)]
pub struct ResilientClient {
    provider_slug: String,
    http: reqwest::Client,
    config: HttpClientConfig,
    breaker: Arc<CircuitBreaker>,
}

impl ResilientClient {
    pub fn new(
        provider_slug: impl Into<String>,
        config: HttpClientConfig,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        Ok(Self {
            provider_slug: provider_slug.into(),
            http,
            config,
            breaker,
        })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Computes the retry delay for a zero-based attempt index, capped at
    /// `max_delay`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay;
        let delay = match self.config.retry_strategy {
            RetryStrategy::Exponential => base.saturating_mul(2u32.saturating_pow(attempt)),
            RetryStrategy::Linear => base.saturating_mul(attempt + 1),
            RetryStrategy::Fixed => base,
        };
        delay.min(self.config.max_delay)
    }

    /// GET `url` and parse the body as JSON.
    ///
    /// Cancellation aborts at the next suspension point and is not recorded
    /// as a breaker failure.
    #[instrument(skip(self, token), fields(provider = %self.provider_slug))]
    pub async fn get(&self, url: &str, token: &CancellationToken) -> Result<Value, ClientError> {
        if !self.breaker.can_execute() {
            counter!("http_client_circuit_rejections", 1);
            return Err(ClientError::CircuitOpen(self.provider_slug.clone()));
        }

        let mut last_error = ClientError::Transport("no attempt made".to_string());

        for attempt in 0..=self.config.max_retries {
            if token.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            let response = tokio::select! {
                _ = token.cancelled() => return Err(ClientError::Cancelled),
                result = self.http.get(url).send() => result,
            };

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        self.breaker.record_success();
                        counter!("http_client_requests_ok", 1);
                        return resp
                            .json::<Value>()
                            .await
                            .map_err(|e| ClientError::Decode(e.to_string()));
                    }

                    if self.config.retry_status_codes.contains(&status.as_u16()) {
                        let delay = if status == StatusCode::TOO_MANY_REQUESTS {
                            self.retry_after(&resp)
                                .unwrap_or_else(|| self.backoff_delay(attempt))
                        } else {
                            self.backoff_delay(attempt)
                        };

                        last_error = ClientError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                        };
                        warn!(
                            provider = %self.provider_slug,
                            status = status.as_u16(),
                            attempt,
                            max_retries = self.config.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            "retryable HTTP status"
                        );

                        if attempt < self.config.max_retries {
                            counter!("http_client_retries", 1);
                            if !self.sleep_cancellable(delay, token).await {
                                return Err(ClientError::Cancelled);
                            }
                        }
                        continue;
                    }

                    // Non-retryable status (4xx other than 429).
                    self.breaker.record_failure();
                    counter!("http_client_requests_failed", 1);
                    return Err(ClientError::Status {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                Err(e) => {
                    if e.is_timeout() || e.is_connect() {
                        last_error = ClientError::Transport(e.to_string());
                        let delay = self.backoff_delay(attempt);
                        warn!(
                            provider = %self.provider_slug,
                            attempt,
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "transport error, retrying"
                        );
                        if attempt < self.config.max_retries {
                            counter!("http_client_retries", 1);
                            if !self.sleep_cancellable(delay, token).await {
                                return Err(ClientError::Cancelled);
                            }
                        }
                        continue;
                    }

                    self.breaker.record_failure();
                    counter!("http_client_requests_failed", 1);
                    return Err(ClientError::Transport(e.to_string()));
                }
            }
        }

        // Retries exhausted.
        self.breaker.record_failure();
        counter!("http_client_requests_failed", 1);
        debug!(provider = %self.provider_slug, "retries exhausted");
        Err(last_error)
    }

    /// Retry-After from a 429, in whole seconds.
    fn retry_after(&self, resp: &reqwest::Response) -> Option<Duration> {
        resp.headers()
            .get(reqwest::header::RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }

    /// Returns false if cancelled mid-sleep.
    async fn sleep_cancellable(&self, delay: Duration, token: &CancellationToken) -> bool {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
