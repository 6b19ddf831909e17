use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PollConfig;

/// Seconds the watermark is bumped past the newest observed issue.
///
/// GitHub timestamps have one-second resolution. Two issues updated within the
/// same second but split across a window boundary can still be missed; that is
/// accepted in exchange for guaranteed forward progress.
pub const WATERMARK_STEP_SECS: i64 = 1;

/// Where ingestion resumes.
///
/// All issues with `updated_at < watermark` have been delivered. `page` is the
/// next page to request within the window that starts at `watermark`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumptionState {
    pub watermark: DateTime<Utc>,
    pub page: u32,
    /// Newest `updated_at` seen in the current window so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_modified_at: Option<DateTime<Utc>>,
    /// Set only mid-page: resume on `page` strictly after this issue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_entity_number: Option<u64>,
    /// `updated_at` of `last_entity_number` when it was delivered. The marker
    /// only counts if the issue is still at that point of the timeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_entity_modified_at: Option<DateTime<Utc>>,
}

impl ResumptionState {
    pub fn initial(watermark: DateTime<Utc>) -> Self {
        Self {
            watermark,
            page: 1,
            last_seen_modified_at: None,
            last_entity_number: None,
            last_entity_modified_at: None,
        }
    }

    /// Repair a state restored from storage.
    pub fn sanitized(mut self) -> Self {
        if self.page == 0 {
            self.page = 1;
        }
        self
    }

    /// Combine what this window has seen with the newest issue of a fresh page.
    pub fn window_max(&self, page_max: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        self.last_seen_modified_at.max(page_max)
    }

    /// The page was full: stay in the window, ask for the next page.
    pub fn next_page(&self, window_max: Option<DateTime<Utc>>) -> Self {
        Self {
            watermark: self.watermark,
            page: self.page + 1,
            last_seen_modified_at: window_max,
            last_entity_number: None,
            last_entity_modified_at: None,
        }
    }

    /// The window is exhausted: move the watermark past everything seen in it
    /// and start over at page 1. With nothing seen, the watermark stays put.
    pub fn roll_forward(&self, window_max: Option<DateTime<Utc>>) -> Self {
        let step = Duration::seconds(WATERMARK_STEP_SECS);
        let watermark = match window_max {
            Some(newest) => self.watermark.max(newest + step),
            None => self.watermark,
        };
        Self::initial(watermark)
    }

    /// State after delivering issue `number`, last modified at `modified_at`,
    /// in the middle of the current page.
    pub fn after_entity(
        &self,
        window_max: DateTime<Utc>,
        number: u64,
        modified_at: DateTime<Utc>,
    ) -> Self {
        Self {
            watermark: self.watermark,
            page: self.page,
            last_seen_modified_at: Some(window_max),
            last_entity_number: Some(number),
            last_entity_modified_at: Some(modified_at),
        }
    }
}

/// Holds the single in-flight [`ResumptionState`] of one worker.
///
/// Persisting it is the host's job; the store only loads and advances.
#[derive(Debug, Clone)]
pub struct CursorStore {
    state: ResumptionState,
}

impl CursorStore {
    /// Start from a saved state, or from the configured horizon if there is none.
    pub fn load(saved: Option<ResumptionState>, config: &PollConfig, now: DateTime<Utc>) -> Self {
        let state = match saved {
            Some(state) => state.sanitized(),
            None => ResumptionState::initial(config.initial_watermark(now)),
        };
        Self { state }
    }

    pub fn current(&self) -> &ResumptionState {
        &self.state
    }

    /// Replace the state with the result of a cycle. The watermark never moves back.
    /// Returns `true` when the watermark advanced.
    pub fn advance(&mut self, mut next: ResumptionState) -> bool {
        if next.watermark < self.state.watermark {
            tracing::warn!(
                current = %self.state.watermark,
                proposed = %next.watermark,
                "refusing to move watermark backwards"
            );
            next.watermark = self.state.watermark;
        }
        let moved = next.watermark > self.state.watermark;
        self.state = next;
        moved
    }
}
