use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ghtap_common::error::{TapError, TapResult};
use ghtap_polling::config::MAX_PAGE_SIZE;
use ghtap_polling::{PollConfig, RateLimiterConfig, SourcePartition};

const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Connection settings for the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub api_url: String,
    pub token: Option<String>,
    /// Retries per request on timeouts, connection errors and 5xx.
    pub max_retries: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub repositories: Vec<SourcePartition>,
    pub github: GitHubSettings,
    pub poll: PollConfig,
    pub rate_limit: RateLimiterConfig,
    /// Base delay before retrying after a failed cycle; doubles per failure.
    pub retry_backoff: Duration,
    /// Postgres offsets. Offsets are kept in memory when unset.
    pub database_url: Option<String>,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads and validates every option.
    pub fn from_env() -> TapResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        let repositories = parse_repositories(&get_var("GITHUB_REPOSITORIES")?)?;

        let github = GitHubSettings {
            api_url: env::var("GITHUB_API_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .as_deref()
                .unwrap_or(DEFAULT_GITHUB_API_URL)
                .trim()
                .trim_end_matches('/')
                .to_owned(),
            token: env::var("GITHUB_TOKEN").ok().filter(|v| !v.is_empty()),
            max_retries: parse_var_or("GITHUB_MAX_RETRIES", 3)?,
            timeout_secs: parse_var_or("GITHUB_TIMEOUT_SECS", 30)?,
        };
        if github.timeout_secs == 0 {
            return Err(TapError::Config(
                "GITHUB_TIMEOUT_SECS must be positive".to_owned(),
            ));
        }

        let lookback_days: i64 = parse_var_or("INGEST_LOOKBACK_DAYS", 7)?;
        if lookback_days <= 0 {
            return Err(TapError::Config(format!(
                "INGEST_LOOKBACK_DAYS must be positive, got {lookback_days}"
            )));
        }

        let page_limit: usize = parse_var_or("INGEST_PAGE_SIZE", MAX_PAGE_SIZE)?;
        if page_limit == 0 || page_limit > MAX_PAGE_SIZE {
            return Err(TapError::Config(format!(
                "INGEST_PAGE_SIZE must be between 1 and {MAX_PAGE_SIZE}, got {page_limit}"
            )));
        }

        let since = env::var("INGEST_SINCE")
            .ok()
            .map(|raw| parse_since(&raw))
            .transpose()?;

        let rate_limit = RateLimiterConfig {
            cooldown: Duration::from_secs(parse_var_or("INGEST_COOLDOWN_SECS", 10)?),
            min_interval: Duration::from_millis(parse_var_or("INGEST_MIN_INTERVAL_MS", 0)?),
            ..RateLimiterConfig::default()
        };

        Ok(Self {
            repositories,
            github,
            poll: PollConfig {
                page_limit,
                lookback: chrono::Duration::days(lookback_days),
                since,
                topic: get_var_or("INGEST_TOPIC", "github-issues"),
            },
            rate_limit,
            retry_backoff: Duration::from_secs(parse_var_or("INGEST_RETRY_BACKOFF_SECS", 5)?),
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            log_level: get_var_or("LOG_LEVEL", "info"),
        })
    }
}

/// Parse a comma-separated list of `owner/name` repositories.
/// Fails on malformed entries, duplicates, or an empty list.
pub fn parse_repositories(raw: &str) -> TapResult<Vec<SourcePartition>> {
    let mut repositories: Vec<SourcePartition> = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let partition = SourcePartition::parse(entry).ok_or_else(|| {
            TapError::Config(format!(
                "GITHUB_REPOSITORIES entry {entry:?} is not of the form owner/name"
            ))
        })?;
        if repositories.contains(&partition) {
            return Err(TapError::Config(format!(
                "GITHUB_REPOSITORIES lists {partition} more than once"
            )));
        }
        repositories.push(partition);
    }

    if repositories.is_empty() {
        return Err(TapError::Config(
            "GITHUB_REPOSITORIES is set but contains no repositories".to_owned(),
        ));
    }

    Ok(repositories)
}

fn parse_since(raw: &str) -> TapResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TapError::Config(format!("invalid INGEST_SINCE {raw:?}: {e}")))
}

fn get_var(key: &str) -> TapResult<String> {
    env::var(key).map_err(|_| TapError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var_or<T>(key: &str, default: T) -> TapResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| TapError::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}
