//! Shared constants used across the application.

/// User agent sent to the search API.
///
/// Identifies the tool honestly so API operators can reach out instead of blocking.
pub const USER_AGENT: &str = concat!(
    "redsaver/",
    env!("CARGO_PKG_VERSION"),
    " (subreddit text archiver)"
);
