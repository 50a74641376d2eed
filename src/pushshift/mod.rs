//! Client for a Pushshift-compatible submission search API.

mod rate_limit;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::constants::USER_AGENT;
use crate::models::Submission;

pub use rate_limit::{retry_after, RateLimitPolicy};

/// Fields requested for every submission.
pub const SUBMISSION_FIELDS: &[&str] = &["id", "created_utc", "score", "title", "selftext"];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("search API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("search API returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("search API still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("failed to decode search API response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One search: submissions in `subreddit` created strictly between
/// `after` and `before`, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub subreddit: String,
    pub after: i64,
    pub before: i64,
    pub limit: u32,
}

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    /// Total matches for the query, when the API reports it.
    pub total_results: Option<u64>,
    pub submissions: Vec<Submission>,
}

/// A submission search backend.
#[async_trait]
pub trait SearchApi: Send + Sync {
    /// Run one search and return a single page of results.
    async fn search_submissions(&self, query: &SearchQuery) -> Result<SearchPage, ApiError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Submission>,
    #[serde(default)]
    metadata: Option<SearchMetadata>,
}

#[derive(Debug, Deserialize)]
struct SearchMetadata {
    total_results: Option<u64>,
}

impl From<SearchResponse> for SearchPage {
    fn from(response: SearchResponse) -> Self {
        Self {
            total_results: response.metadata.and_then(|m| m.total_results),
            submissions: response.data,
        }
    }
}

/// HTTP implementation of [`SearchApi`].
#[derive(Debug, Clone)]
pub struct PushshiftClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    policy: RateLimitPolicy,
}

impl PushshiftClient {
    /// Create a client for the API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
        policy: RateLimitPolicy,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            policy,
        })
    }

    /// Create a client from runtime settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_settings(settings: &Settings) -> Result<Self, ApiError> {
        Self::new(
            &settings.api_base_url,
            settings.api_token.clone(),
            settings.request_timeout,
            settings.rate_limit,
        )
    }

    fn search_url(&self) -> String {
        format!("{}/reddit/search/submission/", self.base_url)
    }
}

#[async_trait]
impl SearchApi for PushshiftClient {
    async fn search_submissions(&self, query: &SearchQuery) -> Result<SearchPage, ApiError> {
        let url = self.search_url();
        let params = [
            ("subreddit", query.subreddit.clone()),
            ("after", query.after.to_string()),
            ("before", query.before.to_string()),
            ("size", query.limit.to_string()),
            ("fields", SUBMISSION_FIELDS.join(",")),
            ("sort", "desc".to_string()),
            ("sort_type", "created_utc".to_string()),
            ("metadata", "true".to_string()),
        ];

        let mut attempt = 0u32;
        loop {
            let mut request = self.client.get(&url).query(&params);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            debug!(
                subreddit = %query.subreddit,
                after = query.after,
                before = query.before,
                attempt,
                "Querying search API"
            );
            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= self.policy.max_retries {
                    return Err(ApiError::RateLimited {
                        attempts: attempt + 1,
                    });
                }
                let wait = self
                    .policy
                    .backoff_for(attempt, retry_after(response.headers()));
                warn!(
                    subreddit = %query.subreddit,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    "Search API rate limited, backing off"
                );
                sleep(wait).await;
                attempt += 1;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::Status {
                    status: status.as_u16(),
                    body: body.chars().take(200).collect(),
                });
            }

            let body = response.bytes().await?;
            let parsed: SearchResponse = serde_json::from_slice(&body)?;
            return Ok(parsed.into());
        }
    }
}
