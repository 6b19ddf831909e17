use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::FetchError;
use crate::model::Issue;

/// Remaining call budget as reported by the upstream with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub issues: Vec<Issue>,
    pub rate_limit: Option<RateLimitSnapshot>,
}

impl Page {
    pub fn new(issues: Vec<Issue>) -> Self {
        Self {
            issues,
            rate_limit: None,
        }
    }
}

/// One "list issues modified since T" request.
///
/// `since` is inclusive: issues updated exactly at `since` are returned.
/// Results are sorted ascending by `updated_at`. `page` starts at 1.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, page: u32, since: DateTime<Utc>) -> Result<Page, FetchError>;
}
