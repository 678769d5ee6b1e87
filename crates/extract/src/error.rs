use std::time::Duration;
use thiserror::Error;

/// Errors from the extraction backends and the rate-limited client.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Missing or invalid backend configuration, e.g. no API key.
    #[error("configuration error: {0}")]
    Config(String),

    /// Retryable network or server failure (timeouts, 408, 502, 503, 504).
    #[error("transient backend error: {0}")]
    Transient(String),

    /// The backend asked us to wait longer than we are willing to.
    #[error("rate limited: suggested wait {wait:?} exceeds limit {limit:?}")]
    RateLimitExceeded { wait: Duration, limit: Duration },

    /// Non-retryable HTTP status. `body` is truncated.
    #[error("backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    /// A 2xx response whose envelope has no message content, e.g. an
    /// error object relayed with status 200. `body` is truncated.
    #[error("{backend} response has no message content: {body}")]
    Envelope { backend: &'static str, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
