use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::ResumptionState;
use crate::error::TranslateError;
use crate::model::{Issue, SourcePartition};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueKey {
    pub owner: String,
    pub repository: String,
    pub number: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserValue {
    pub url: String,
    pub id: u64,
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestValue {
    pub url: String,
    pub html_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueValue {
    pub url: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub number: u64,
    pub state: String,
    pub user: UserValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestValue>,
}

/// One change event. `offset` is enough to resume strictly after this issue
/// even if nothing later in the same cycle was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub topic: String,
    pub partition: SourcePartition,
    pub key: IssueKey,
    pub value: IssueValue,
    pub offset: ResumptionState,
    /// `updated_at` in epoch milliseconds.
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone)]
pub struct EventEmitter {
    partition: SourcePartition,
    topic: String,
}

impl EventEmitter {
    pub fn new(partition: SourcePartition, topic: impl Into<String>) -> Self {
        Self {
            partition,
            topic: topic.into(),
        }
    }

    pub fn partition(&self) -> &SourcePartition {
        &self.partition
    }

    /// Build the event for `issue`. Deterministic in `(issue, offset)`.
    pub fn emit(
        &self,
        issue: &Issue,
        offset: ResumptionState,
    ) -> Result<OutboundEvent, TranslateError> {
        // author is mandatory in the event schema
        let user = issue
            .user
            .as_ref()
            .ok_or(TranslateError::MissingAuthor {
                number: issue.number,
            })?;

        let value = IssueValue {
            url: issue.url.clone(),
            title: issue.title.clone(),
            created_at: issue.created_at,
            updated_at: issue.updated_at,
            number: issue.number,
            state: issue.state.clone(),
            user: UserValue {
                url: user.url.clone(),
                id: user.id,
                login: user.login.clone(),
            },
            pull_request: issue.pull_request.as_ref().map(|pr| PullRequestValue {
                url: pr.url.clone(),
                html_url: pr.html_url.clone(),
            }),
        };

        Ok(OutboundEvent {
            topic: self.topic.clone(),
            partition: self.partition.clone(),
            key: IssueKey {
                owner: self.partition.owner.clone(),
                repository: self.partition.repository.clone(),
                number: issue.number,
            },
            value,
            offset,
            timestamp_ms: issue.updated_at.timestamp_millis(),
        })
    }
}
