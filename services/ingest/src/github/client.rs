use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use ghtap_config::GitHubSettings;
use ghtap_polling::{FetchError, Issue, Page, RateLimitSnapshot, SourcePartition};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};

const MAX_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct GitHubClientConfig {
    pub base_url: String,
    /// Anonymous requests are allowed but get a much smaller budget.
    pub token: Option<String>,
    pub user_agent: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl GitHubClientConfig {
    pub fn from_settings(settings: &GitHubSettings, user_agent: &str) -> Self {
        Self {
            base_url: settings.api_url.clone(),
            token: settings.token.clone(),
            user_agent: user_agent.to_string(),
            max_retries: settings.max_retries,
            timeout_secs: settings.timeout_secs,
        }
    }
}

#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    config: GitHubClientConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum GitHubClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("rate limit exhausted until {}", .snapshot.reset_at)]
    RateLimited { snapshot: RateLimitSnapshot },

    #[error("malformed issues payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<GitHubClientError> for FetchError {
    fn from(err: GitHubClientError) -> Self {
        match err {
            GitHubClientError::HttpError { status, body } => FetchError::Rejected {
                status: status.as_u16(),
                body,
            },
            GitHubClientError::RateLimited { snapshot } => FetchError::RateLimited(snapshot),
            GitHubClientError::Decode(e) => FetchError::Decode(e.to_string()),
            e @ (GitHubClientError::RequestError(_)
            | GitHubClientError::MaxRetriesExceeded { .. }) => {
                FetchError::Transient(e.to_string())
            }
        }
    }
}

impl GitHubClient {
    pub fn new(config: GitHubClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    /// For testing: create a client pointing at a specific base URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    pub fn config(&self) -> &GitHubClientConfig {
        &self.config
    }

    /// One page of issues and pull requests updated at or after `since`,
    /// oldest first.
    pub async fn list_issues(
        &self,
        partition: &SourcePartition,
        page: u32,
        per_page: usize,
        since: DateTime<Utc>,
    ) -> Result<Page, GitHubClientError> {
        let url = format!(
            "{}/repos/{}/{}/issues?state=all&sort=updated&direction=asc&since={}&per_page={}&page={}",
            self.config.base_url,
            partition.owner,
            partition.repository,
            since.to_rfc3339_opts(SecondsFormat::Secs, true),
            per_page,
            page
        );

        let (body, rate_limit) = self.request_with_retry(&url).await?;
        let issues: Vec<Issue> = serde_json::from_slice(&body)?;

        tracing::debug!(
            partition = %partition,
            page,
            count = issues.len(),
            remaining = rate_limit.map(|r| r.remaining),
            "fetched issues page"
        );

        Ok(Page {
            issues,
            rate_limit,
        })
    }

    async fn request_with_retry(
        &self,
        url: &str,
    ) -> Result<(Vec<u8>, Option<RateLimitSnapshot>), GitHubClientError> {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff_secs = std::cmp::min(1u64 << attempt, 30);
                tracing::warn!(attempt, backoff_secs, "retrying after backoff");
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }

            let mut request = self
                .client
                .get(url)
                .header("Accept", "application/vnd.github+json");
            if let Some(token) = &self.config.token {
                request = request.bearer_auth(token);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(GitHubClientError::RequestError(e));
                }
            };

            let status = response.status();
            let rate_limit = parse_rate_limit(response.headers());

            if status.is_success() {
                match response.bytes().await {
                    Ok(body) => return Ok((body.to_vec(), rate_limit)),
                    Err(e) => {
                        last_error = e.to_string();
                        continue;
                    }
                }
            }

            // Primary limit: nothing left until the reset, let the limiter wait it out
            if matches!(status, StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS) {
                if let Some(snapshot) = rate_limit.filter(|r| r.remaining == 0) {
                    return Err(GitHubClientError::RateLimited { snapshot });
                }
            }

            // Secondary limit: honor Retry-After
            let retry_after = parse_retry_after(response.headers());
            if status == StatusCode::TOO_MANY_REQUESTS
                || (status == StatusCode::FORBIDDEN && retry_after.is_some())
            {
                if let Some(wait) = retry_after {
                    tracing::warn!(
                        wait_secs = wait.as_secs(),
                        %status,
                        "rate-limited, waiting Retry-After"
                    );
                    tokio::time::sleep(wait).await;
                }
                last_error = format!("{status}");
                continue;
            }

            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(GitHubClientError::HttpError { status, body });
        }

        Err(GitHubClientError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}

/// `Retry-After` in seconds, capped at [`MAX_RETRY_AFTER_SECS`].
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)))
}

/// Reads `x-ratelimit-remaining` and `x-ratelimit-reset` (epoch seconds).
fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimitSnapshot> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let remaining = header("x-ratelimit-remaining")?.trim().parse::<u32>().ok()?;
    let reset_secs = header("x-ratelimit-reset")?.trim().parse::<i64>().ok()?;
    let reset_at = DateTime::<Utc>::from_timestamp(reset_secs, 0)?;

    Some(RateLimitSnapshot {
        remaining,
        reset_at,
    })
}
