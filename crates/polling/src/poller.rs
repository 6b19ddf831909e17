use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::PollConfig;
use crate::cursor::{CursorStore, ResumptionState};
use crate::emitter::{EventEmitter, OutboundEvent};
use crate::error::{CycleError, FetchError, RateLimitError};
use crate::fetcher::PageFetcher;
use crate::model::{Issue, SourcePartition};
use crate::rate_limit::RateLimiter;

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub events: Vec<OutboundEvent>,
    /// State to resume from after every event of this cycle is recorded.
    pub state: ResumptionState,
    /// Issues returned by the upstream, including ones skipped on resume.
    pub fetched: usize,
    pub window_exhausted: bool,
}

/// Evaluates one poll cycle against a given state. Holds no cursor of its own.
pub struct Poller<F> {
    fetcher: F,
    limiter: Arc<RateLimiter>,
    emitter: EventEmitter,
    page_limit: usize,
}

impl<F> Poller<F>
where
    F: PageFetcher,
{
    pub fn new(
        fetcher: F,
        limiter: Arc<RateLimiter>,
        emitter: EventEmitter,
        page_limit: usize,
    ) -> Self {
        Self {
            fetcher,
            limiter,
            emitter,
            page_limit,
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn partition(&self) -> &SourcePartition {
        self.emitter.partition()
    }

    /// Run one cycle: acquire budget, fetch `state.page` of the window at
    /// `state.watermark`, translate, and compute the next state.
    ///
    /// A full page keeps the watermark and moves to the next page. A short
    /// page (including an empty one) closes the window: the watermark moves
    /// one step past the newest issue seen in it, the page resets to 1 and
    /// the limiter's cooldown runs.
    ///
    /// Fails without side effects on the cursor: either every issue of the
    /// page becomes an event or the whole cycle is an error.
    pub async fn run_cycle(
        &self,
        state: &ResumptionState,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome, CycleError> {
        self.limiter.acquire(cancel).await?;

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CycleError::Cancelled),
            result = self.fetcher.fetch(state.page, state.watermark) => result,
        };
        let page = match fetched {
            Ok(page) => page,
            Err(err) => {
                if let FetchError::RateLimited(snapshot) = &err {
                    self.limiter.observe(snapshot);
                }
                return Err(err.into());
            }
        };
        if let Some(snapshot) = &page.rate_limit {
            self.limiter.observe(snapshot);
        }

        let mut issues = page.issues;
        issues.sort_by_key(|i| i.updated_at);

        let fetched = issues.len();
        let window_exhausted = fetched < self.page_limit;
        let window_max = state.window_max(issues.last().map(|i| i.updated_at));
        let next = if window_exhausted {
            state.roll_forward(window_max)
        } else {
            state.next_page(window_max)
        };

        let events = self.translate(state, &issues, &next)?;

        if fetched > 0 {
            tracing::info!(
                partition = %self.partition(),
                page = state.page,
                fetched,
                emitted = events.len(),
                "fetched issue(s)"
            );
        }

        if window_exhausted {
            tracing::debug!(
                partition = %self.partition(),
                watermark = %next.watermark,
                "window exhausted"
            );
            if let Err(RateLimitError::Cancelled) =
                self.limiter.mark_batch_boundary(cancel).await
            {
                tracing::debug!(
                    partition = %self.partition(),
                    "cooldown interrupted by shutdown"
                );
            }
        }

        Ok(CycleOutcome {
            events,
            state: next,
            fetched,
            window_exhausted,
        })
    }

    fn translate(
        &self,
        state: &ResumptionState,
        issues: &[Issue],
        next: &ResumptionState,
    ) -> Result<Vec<OutboundEvent>, CycleError> {
        let start = resume_position(issues, state);
        if start > 0 {
            tracing::debug!(
                partition = %self.partition(),
                skipped = start,
                "skipping issues delivered before restart"
            );
        }

        let mut seen = state.last_seen_modified_at;
        let mut events = Vec::with_capacity(issues.len().saturating_sub(start));

        for (idx, issue) in issues.iter().enumerate() {
            let high = seen.map_or(issue.updated_at, |s| s.max(issue.updated_at));
            seen = Some(high);
            if idx < start {
                continue;
            }

            // the last issue of the page resumes exactly where the cycle ends
            let offset = if idx + 1 == issues.len() {
                next.clone()
            } else {
                state.after_entity(high, issue.number, issue.updated_at)
            };
            events.push(self.emitter.emit(issue, offset)?);
        }

        Ok(events)
    }
}

/// Index of the first issue after the resume marker. Everything is emitted
/// again if the marker issue is no longer on the page or was edited since it
/// was delivered, because the issues that followed it may have moved.
fn resume_position(issues: &[Issue], state: &ResumptionState) -> usize {
    let (Some(number), Some(modified_at)) =
        (state.last_entity_number, state.last_entity_modified_at)
    else {
        return 0;
    };
    issues
        .iter()
        .position(|i| i.number == number && i.updated_at == modified_at)
        .map_or(0, |pos| pos + 1)
}

/// A poller bound to its cursor: the per-repository unit the host drives.
pub struct PollWorker<F> {
    poller: Poller<F>,
    cursor: CursorStore,
}

impl<F> PollWorker<F>
where
    F: PageFetcher,
{
    pub fn load(poller: Poller<F>, saved: Option<ResumptionState>, config: &PollConfig) -> Self {
        let cursor = CursorStore::load(saved, config, Utc::now());
        tracing::info!(
            partition = %poller.partition(),
            watermark = %cursor.current().watermark,
            page = cursor.current().page,
            "cursor loaded"
        );
        Self { poller, cursor }
    }

    pub fn state(&self) -> &ResumptionState {
        self.cursor.current()
    }

    pub fn partition(&self) -> &SourcePartition {
        self.poller.partition()
    }

    pub fn poller(&self) -> &Poller<F> {
        &self.poller
    }

    /// Run a cycle and, only if it succeeded, advance the cursor to its result.
    pub async fn run_one_cycle(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome, CycleError> {
        let outcome = self.poller.run_cycle(self.cursor.current(), cancel).await?;
        if self.cursor.advance(outcome.state.clone()) {
            tracing::debug!(
                partition = %self.partition(),
                watermark = %self.cursor.current().watermark,
                "watermark advanced"
            );
        }
        Ok(outcome)
    }
}
