//! Retry policy for transient request failures
//!
//! The API client drives its own retry loop (rate-limit handling is
//! interleaved with it), parameterized by the pieces here: a retryable-error
//! predicate ([`IsRetryable`]), a backoff function ([`backoff_delay`]), and
//! the attempt ceiling from [`RetryConfig`](crate::config::RetryConfig).

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::time::Duration;

/// Extra margin added on top of a server-advised rate-limit delay.
///
/// Sleeping exactly `retry_after` tends to hit the limiter again on the next
/// request; the half second keeps us clear of the window edge.
pub const RATE_LIMIT_MARGIN: Duration = Duration::from_millis(500);

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (rate limits, 5xx, network timeouts) return `true`.
/// Permanent failures (authorization, malformed responses, disk errors)
/// return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Server-advised delay, always worth waiting out
            Error::RateLimited { .. } => true,
            // 5xx is the service having a bad moment
            Error::Server { .. } => true,
            // Only timeouts and connection failures; a decode error surfaced
            // through reqwest is permanent
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            // Authorization problems never improve by retrying
            Error::Unauthorized | Error::Forbidden => false,
            Error::NotFound => false,
            Error::MalformedResponse(_) | Error::UnexpectedStatus(_) => false,
            Error::RetriesExhausted { .. } => false,
            Error::InvalidCredential | Error::InvalidBaseUrl(_) => false,
            Error::Io(_) | Error::Serialization(_) => false,
            Error::Cancelled => false,
        }
    }
}

/// Backoff delay before retry number `attempt` (zero-based).
///
/// Exponential: `initial_delay * multiplier^attempt`, capped at `max_delay`,
/// with optional uniform jitter in `[delay, 2*delay]`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = config.backoff_multiplier.powi(attempt as i32);
    let raw = Duration::from_secs_f64(config.initial_delay.as_secs_f64() * factor);
    let capped = raw.min(config.max_delay);
    if config.jitter {
        add_jitter(capped)
    } else {
        capped
    }
}

/// Delay to honor after an HTTP 429: the server's advised delay plus margin.
pub fn rate_limit_delay(retry_after: Duration) -> Duration {
    retry_after + RATE_LIMIT_MARGIN
}

fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
