use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::pushshift::RateLimitPolicy;
use crate::store::MergePolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Runtime settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    // Storage
    pub archive_dir: PathBuf,
    pub merge_policy: MergePolicy,

    // Search API
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub request_timeout: Duration,

    // Paging
    pub page_size: u32,
    /// Upper bound on pages per run, `None` for no bound.
    pub max_pages: Option<u32>,

    // Rate limiting
    pub rate_limit: RateLimitPolicy,
}

impl Settings {
    /// Load settings from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_pages = parse_env_u32("MAX_PAGES", 0)?;

        Ok(Self {
            // Storage
            archive_dir: PathBuf::from(env_or_default("ARCHIVE_DIR", ".")),
            merge_policy: parse_merge_policy(&env_or_default("MERGE_POLICY", "keep-existing"))?,

            // Search API
            api_base_url: env_or_default("PUSHSHIFT_URL", "https://api.pushshift.io"),
            api_token: optional_env("PUSHSHIFT_TOKEN"),
            request_timeout: Duration::from_secs(parse_env_u64("REQUEST_TIMEOUT_SECS", 30)?),

            // Paging
            page_size: parse_env_u32("PAGE_SIZE", 2000)?,
            max_pages: (max_pages > 0).then_some(max_pages),

            // Rate limiting
            rate_limit: RateLimitPolicy {
                page_delay: Duration::from_millis(parse_env_u64("PAGE_DELAY_MS", 1000)?),
                max_retries: parse_env_u32("RATE_LIMIT_MAX_RETRIES", 3)?,
                retry_backoff: Duration::from_millis(parse_env_u64(
                    "RATE_LIMIT_BACKOFF_MS",
                    2000,
                )?),
            },
        })
    }

    /// Validate that the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "PAGE_SIZE".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "REQUEST_TIMEOUT_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if let Err(e) = url::Url::parse(&self.api_base_url) {
            return Err(ConfigError::InvalidValue {
                name: "PUSHSHIFT_URL".to_string(),
                message: e.to_string(),
            });
        }
        Ok(())
    }

    /// Path of the per-subreddit checkpoint file.
    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.archive_dir.join("config.json")
    }

    /// Settings for tests: current directory, no delays.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            archive_dir: PathBuf::from("."),
            merge_policy: MergePolicy::KeepExisting,
            api_base_url: "http://127.0.0.1:9".to_string(),
            api_token: None,
            request_timeout: Duration::from_secs(5),
            page_size: 2000,
            max_pages: None,
            rate_limit: RateLimitPolicy {
                page_delay: Duration::ZERO,
                max_retries: 0,
                retry_backoff: Duration::ZERO,
            },
        }
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_merge_policy(value: &str) -> Result<MergePolicy, ConfigError> {
    match value.to_lowercase().replace('_', "-").as_str() {
        "keep-existing" => Ok(MergePolicy::KeepExisting),
        "prefer-fetched" => Ok(MergePolicy::PreferFetched),
        _ => Err(ConfigError::InvalidValue {
            name: "MERGE_POLICY".to_string(),
            message: format!("must be 'keep-existing' or 'prefer-fetched', got '{value}'"),
        }),
    }
}
