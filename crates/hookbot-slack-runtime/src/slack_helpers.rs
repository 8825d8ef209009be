//! Retry policy and message-size helpers for Slack Web API calls.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

/// Exponential backoff stops growing after this many doublings.
const MAX_BACKOFF_DOUBLINGS: u32 = 6;
/// Largest server-provided `Retry-After` that is honoured as-is.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    pub(crate) fn new(max_attempts: usize, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms.max(1)),
        }
    }

    /// `attempt` is 1-based.
    pub(crate) fn allows_retry_after(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }

    pub(crate) fn retries_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    pub(crate) fn retries_transport_error(error: &reqwest::Error) -> bool {
        error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
    }

    /// Wait before the attempt that follows `attempt`. `Retry-After` wins over backoff.
    pub(crate) fn delay_after(&self, attempt: usize, headers: Option<&HeaderMap>) -> Duration {
        if let Some(wait) = headers.and_then(retry_after) {
            return wait;
        }
        let doublings = u32::try_from(attempt.saturating_sub(1))
            .unwrap_or(MAX_BACKOFF_DOUBLINGS)
            .min(MAX_BACKOFF_DOUBLINGS);
        self.base_delay.saturating_mul(1_u32 << doublings)
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let seconds = headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()?;
    Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER))
}

/// Cuts `value` after `max_chars` characters and marks the cut with `...`.
pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &value[..cut]),
        None => value.to_string(),
    }
}
