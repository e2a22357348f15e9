//! Error types for model invocation.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while invoking a model.
#[derive(Debug, Error)]
pub enum Error {
    /// Failure that may succeed on retry (rate limit, timeout, overloaded upstream).
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Failure that will not succeed on retry (bad credentials, unknown model).
    #[error("permanent provider error: {0}")]
    Permanent(String),

    /// Request could not be built or the response could not be read.
    #[error("request failed: {0}")]
    Request(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether retrying the same call may succeed.
    ///
    /// Request and serialization failures are treated as transient: a garbled
    /// response body is usually a one-off, and the runner bounds the attempts.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Error::Permanent(_))
    }

    /// Classify an HTTP status returned by a provider API.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("provider returned status {status}")
        } else {
            format!("provider returned status {status}: {body}")
        };
        match status {
            408 | 425 | 429 | 500..=599 => Error::Transient(message),
            _ => Error::Permanent(message),
        }
    }
}
