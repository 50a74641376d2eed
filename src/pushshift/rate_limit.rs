//! Rate-limit contract for the search API.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Longest single wait after a 429, whatever the server or backoff asks for.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// How politely to talk to a rate-limited search API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Pause after every page of results.
    pub page_delay: Duration,
    /// Retries after HTTP 429 before giving up.
    pub max_retries: u32,
    /// Base wait after a 429 without `Retry-After`, doubled per attempt.
    pub retry_backoff: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_secs(1),
            max_retries: 3,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

impl RateLimitPolicy {
    /// Wait before retry number `attempt` (0-based).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let wait = retry_after.unwrap_or_else(|| {
            let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
            self.retry_backoff.saturating_mul(factor)
        });
        wait.min(MAX_BACKOFF)
    }
}

/// Parse a `Retry-After` header given in seconds.
///
/// The HTTP-date form is ignored and falls back to exponential backoff.
#[must_use]
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
