use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::ExtractError;

/// Longest error body kept in `ExtractError::Backend`.
const ERROR_BODY_LIMIT: usize = 400;

/// Pacing and backoff for a remote, rate-limited backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Pause after every successful call.
    pub min_interval_ms: u64,
    /// Longest single wait we accept on a 429 before giving up.
    pub max_wait_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Upper bound of the random delay added to each backoff step.
    pub max_jitter_ms: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            min_interval_ms: 3_500,
            max_wait_ms: 90_000,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 60_000,
            max_jitter_ms: 500,
        }
    }
}

impl RateLimitPolicy {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        std::cmp::min(current * 2, Duration::from_millis(self.max_backoff_ms))
    }

    fn with_jitter(&self, backoff: Duration) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..=self.max_jitter_ms);
        backoff + Duration::from_millis(jitter)
    }
}

/// The parts of an HTTP response the retry loop looks at.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    /// `Retry-After` header, in seconds.
    pub retry_after: Option<String>,
    /// `X-RateLimit-Reset` header, as epoch milliseconds.
    pub rate_limit_reset: Option<String>,
    pub body: String,
}

impl RawResponse {
    pub async fn from_response(response: reqwest::Response) -> Result<Self, reqwest::Error> {
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let status = response.status().as_u16();
        let retry_after = header("retry-after");
        let rate_limit_reset = header("x-ratelimit-reset");
        let body = response.text().await?;

        Ok(Self {
            status,
            retry_after,
            rate_limit_reset,
            body,
        })
    }
}

/// Wait suggested by the server on a 429, if it gave a usable hint.
/// The reset timestamp takes precedence over `Retry-After`.
pub fn hinted_wait(response: &RawResponse, now: SystemTime) -> Option<Duration> {
    let from_reset = response
        .rate_limit_reset
        .as_deref()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(|reset_ms| {
            let now_ms = now
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            Duration::from_millis(reset_ms.saturating_sub(now_ms).max(0) as u64)
        });

    from_reset.or_else(|| {
        response
            .retry_after
            .as_deref()
            .and_then(|v| v.trim().parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    })
}

fn truncate(body: &str, limit: usize) -> String {
    body.chars().take(limit).collect()
}

/// Drives calls to a remote backend through backoff, jitter and pacing.
#[derive(Debug, Clone, Default)]
pub struct RateLimitedClient {
    policy: RateLimitPolicy,
}

impl RateLimitedClient {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self { policy }
    }

    /// Run `send` until it yields a 2xx body or a non-retryable failure.
    ///
    /// `send` performs exactly one HTTP attempt. Transport failures must be
    /// reported as `ExtractError::Transient` to be retried.
    pub async fn execute<F, Fut>(
        &self,
        operation_name: &str,
        mut send: F,
    ) -> Result<String, ExtractError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<RawResponse, ExtractError>>,
    {
        let mut attempt: u32 = 0;
        let mut backoff = self.policy.initial_backoff();

        loop {
            attempt += 1;

            let response = match send().await {
                Ok(response) => response,
                Err(ExtractError::Transient(reason)) => {
                    let wait = self.policy.with_jitter(backoff);
                    warn!(
                        operation = operation_name,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %reason,
                        "Transient failure, retrying"
                    );
                    sleep(wait).await;
                    backoff = self.policy.next_backoff(backoff);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match response.status {
                200..=299 => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempts = attempt,
                            "Operation succeeded after retries"
                        );
                    }
                    sleep(self.policy.min_interval()).await;
                    return Ok(response.body);
                }
                429 => {
                    // A stale reset hint gives zero; back off instead
                    let wait = match hinted_wait(&response, SystemTime::now()) {
                        Some(wait) if !wait.is_zero() => wait,
                        _ => {
                            let wait = self.policy.with_jitter(backoff);
                            backoff = self.policy.next_backoff(backoff);
                            wait
                        }
                    };

                    if wait > self.policy.max_wait() {
                        warn!(
                            operation = operation_name,
                            wait_ms = wait.as_millis() as u64,
                            max_wait_ms = self.policy.max_wait_ms,
                            "Rate limit wait exceeds limit, giving up"
                        );
                        return Err(ExtractError::RateLimitExceeded {
                            wait,
                            limit: self.policy.max_wait(),
                        });
                    }

                    warn!(
                        operation = operation_name,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limited, sleeping"
                    );
                    sleep(wait).await;
                }
                408 | 502 | 503 | 504 => {
                    let wait = self.policy.with_jitter(backoff);
                    warn!(
                        operation = operation_name,
                        attempt,
                        status = response.status,
                        wait_ms = wait.as_millis() as u64,
                        "Transient status, retrying"
                    );
                    sleep(wait).await;
                    backoff = self.policy.next_backoff(backoff);
                }
                status => {
                    return Err(ExtractError::Backend {
                        status,
                        body: truncate(&response.body, ERROR_BODY_LIMIT),
                    });
                }
            }
        }
    }
}
