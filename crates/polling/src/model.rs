use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An issue from the GitHub REST API (`GET /repos/{owner}/{repo}/issues`).
///
/// Pull requests are issues too; they carry a `pull_request` reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub url: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub number: u64,
    pub state: String,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub pull_request: Option<PullRequestRef>,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub url: String,
    pub id: u64,
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub url: String,
    pub html_url: String,
}

/// The owner/repository pair one worker ingests. Stable for the lifetime of
/// every entity in it, so it doubles as the offset partition key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourcePartition {
    pub owner: String,
    pub repository: String,
}

impl SourcePartition {
    pub fn new(owner: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repository: repository.into(),
        }
    }

    /// Parse `owner/name`. Both halves must be non-empty and there must be exactly one slash.
    pub fn parse(raw: &str) -> Option<Self> {
        let (owner, repository) = raw.trim().split_once('/')?;
        let (owner, repository) = (owner.trim(), repository.trim());
        if owner.is_empty() || repository.is_empty() || repository.contains('/') {
            return None;
        }
        Some(Self::new(owner, repository))
    }
}

impl fmt::Display for SourcePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repository)
    }
}
