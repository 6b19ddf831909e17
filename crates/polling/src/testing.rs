//! Deterministic fetchers for exercising the poller without HTTP.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::error::FetchError;
use crate::fetcher::{Page, PageFetcher};
use crate::model::{Issue, User};

pub fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
}

pub fn issue(number: u64, updated_at: DateTime<Utc>) -> Issue {
    Issue {
        url: format!("https://api.github.com/repos/octo/hello/issues/{number}"),
        title: format!("Issue {number}"),
        created_at: t(0),
        updated_at,
        number,
        state: "open".to_string(),
        user: Some(User {
            url: format!("https://api.github.com/users/user-{number}"),
            id: 1000 + number,
            login: format!("user-{number}"),
        }),
        pull_request: None,
    }
}

/// Behaves like the issues endpoint over a fixed data set: inclusive `since`
/// filter, ascending by `updated_at`, fixed page size.
pub struct FixtureFetcher {
    issues: Mutex<Vec<Issue>>,
    page_size: usize,
    requests: Mutex<Vec<(u32, DateTime<Utc>)>>,
}

impl FixtureFetcher {
    pub fn new(issues: Vec<Issue>, page_size: usize) -> Self {
        Self {
            issues: Mutex::new(issues),
            page_size,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(u32, DateTime<Utc>)> {
        self.requests.lock().unwrap().clone()
    }

    /// Simulate an edit: the issue moves to `updated_at` on the timeline.
    pub fn touch(&self, number: u64, updated_at: DateTime<Utc>) {
        for issue in self.issues.lock().unwrap().iter_mut() {
            if issue.number == number {
                issue.updated_at = updated_at;
            }
        }
    }
}

#[async_trait]
impl PageFetcher for FixtureFetcher {
    async fn fetch(&self, page: u32, since: DateTime<Utc>) -> Result<Page, FetchError> {
        self.requests.lock().unwrap().push((page, since));

        let mut matching: Vec<Issue> = self
            .issues
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.updated_at >= since)
            .cloned()
            .collect();
        matching.sort_by_key(|i| (i.updated_at, i.number));

        let skip = (page as usize - 1) * self.page_size;
        Ok(Page::new(
            matching.into_iter().skip(skip).take(self.page_size).collect(),
        ))
    }
}

/// Replays canned results in order.
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<Page, FetchError>>>,
    requests: Mutex<Vec<(u32, DateTime<Utc>)>>,
}

impl ScriptedFetcher {
    pub fn new(script: Vec<Result<Page, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(u32, DateTime<Utc>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, page: u32, since: DateTime<Utc>) -> Result<Page, FetchError> {
        self.requests.lock().unwrap().push((page, since));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Page::default()))
    }
}
