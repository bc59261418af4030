//! Error types for dm-archiver
//!
//! One `Error` enum covers the whole crate. Variants are grouped by how they
//! propagate:
//! - per-request failures are resolved (or exhausted) inside the API client
//! - per-channel failures are resolved inside the archiver and reported as an
//!   outcome plus a log entry
//! - only credential-validation failure and cancellation end a whole run

use std::time::Duration;
use thiserror::Error;

/// Result type alias for dm-archiver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for dm-archiver
#[derive(Debug, Error)]
pub enum Error {
    /// Credential rejected by the service (HTTP 401), never retried
    #[error("unauthorized: credential rejected by the service")]
    Unauthorized,

    /// Access denied (HTTP 403), never retried; per-channel it is treated as
    /// an empty history rather than a run failure
    #[error("forbidden: access denied")]
    Forbidden,

    /// Resource does not exist (HTTP 404); per-channel, treated as empty
    #[error("not found")]
    NotFound,

    /// Rate limited (HTTP 429) with a server-advised delay
    #[error("rate limited: retry after {retry_after:?}")]
    RateLimited {
        /// Delay advised by the service body (`retry_after` seconds)
        retry_after: Duration,
    },

    /// Server-side failure (HTTP 5xx), retryable with backoff
    #[error("server error: HTTP {status}")]
    Server {
        /// The 5xx status code returned by the service
        status: reqwest::StatusCode,
    },

    /// Network-level failure (timeout, connect, transport)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A retryable condition persisted through every allowed attempt
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made before giving up
        attempts: u32,
        /// Description of the final failure
        last_error: String,
    },

    /// Response decoded but did not have the expected shape, never retried
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Any other non-2xx status with no special handling, never retried
    #[error("unexpected status: HTTP {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    /// Credential contains bytes that cannot form a request header
    #[error("credential is not a valid header value")]
    InvalidCredential,

    /// Configured API base URL does not parse
    #[error("invalid API base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    /// Disk write or rename failure while persisting an archive
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// User-initiated cancellation, propagated through every layer,
    /// overriding retry and backoff waits
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// True for per-channel conditions that are logged and treated as an
    /// empty history instead of failing the channel outright.
    pub fn is_empty_history(&self) -> bool {
        matches!(
            self,
            Error::Forbidden | Error::NotFound | Error::MalformedResponse(_)
        )
    }
}
