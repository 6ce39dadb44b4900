//! Typed errors for the external-API layer.
//!
//! The vision/LLM and embedding clients return [`ApiError`] so that callers
//! can distinguish throttling (retryable via the batch executor) from
//! terminal failures. Everything above the API layer uses `anyhow`.

use thiserror::Error;

/// Error returned by the vision/LLM and embedding HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The upstream API signalled throttling (HTTP 429). The batch
    /// executor retries these with backoff.
    #[error("rate limited by upstream API")]
    RateLimited,

    /// Non-retryable HTTP error.
    #[error("API error {status}: {body}")]
    Http { status: u16, body: String },

    /// Transport-level failure (DNS, connect, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The API answered 2xx but the payload did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Network(e.to_string())
    }
}
