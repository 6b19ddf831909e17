use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ghtap_common::error::{TapError, TapResult};
use ghtap_db::offsets::repositories::OffsetRepository;
use ghtap_polling::{
    CycleError, CycleOutcome, PageFetcher, PollWorker, ResumptionState, SourcePartition,
};
use tokio_util::sync::CancellationToken;

use crate::sink::EventSink;

const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub partition: SourcePartition,
    pub cycles: u64,
    pub events: u64,
    pub failures: u64,
}

/// Read the saved resumption state of a partition. An unreadable value is
/// treated as absent so the worker restarts from its lookback window.
pub async fn load_offset<R>(
    offsets: &R,
    partition: &SourcePartition,
) -> TapResult<Option<ResumptionState>>
where
    R: OffsetRepository + ?Sized,
{
    let Some(stored) = offsets
        .load(&partition.owner, &partition.repository)
        .await?
    else {
        return Ok(None);
    };

    match serde_json::from_value::<ResumptionState>(stored.offset_value) {
        Ok(state) => Ok(Some(state)),
        Err(e) => {
            tracing::warn!(
                partition = %partition,
                error = %e,
                "stored offset is unreadable, starting from lookback window"
            );
            Ok(None)
        }
    }
}

/// Drives one repository: poll, publish each event, then record its offset.
///
/// An offset is only written after the sink accepted the event it belongs
/// to, so a restart may repeat events but never skips one.
pub struct RepositoryRunner<F, S: ?Sized, R: ?Sized> {
    worker: PollWorker<F>,
    sink: Arc<S>,
    offsets: Arc<R>,
    retry_backoff: Duration,
    last_saved: Option<ResumptionState>,
}

impl<F, S, R> RepositoryRunner<F, S, R>
where
    F: PageFetcher,
    S: EventSink + ?Sized,
    R: OffsetRepository + ?Sized,
{
    pub fn new(
        worker: PollWorker<F>,
        sink: Arc<S>,
        offsets: Arc<R>,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            worker,
            sink,
            offsets,
            retry_backoff,
            last_saved: None,
        }
    }

    /// Poll until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> RunSummary {
        let mut summary = RunSummary {
            partition: self.worker.partition().clone(),
            cycles: 0,
            events: 0,
            failures: 0,
        };
        let mut consecutive_failures = 0u32;

        tracing::info!(partition = %summary.partition, "worker started");

        while !cancel.is_cancelled() {
            match self.worker.run_one_cycle(&cancel).await {
                Ok(outcome) => {
                    consecutive_failures = 0;
                    summary.cycles += 1;
                    if !self.deliver(&outcome, &cancel, &mut summary).await {
                        break;
                    }
                }
                Err(CycleError::Cancelled) => break,
                Err(e) => {
                    summary.failures += 1;
                    consecutive_failures += 1;
                    let delay = backoff(self.retry_backoff, consecutive_failures);

                    if e.is_transient() {
                        tracing::warn!(
                            partition = %summary.partition,
                            error = %e,
                            retry_in_secs = delay.as_secs(),
                            "poll cycle failed"
                        );
                    } else {
                        tracing::error!(
                            partition = %summary.partition,
                            error = %e,
                            decode = e.is_decode(),
                            retry_in_secs = delay.as_secs(),
                            "poll cycle failed"
                        );
                    }

                    if !sleep_or_cancelled(delay, &cancel).await {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            partition = %summary.partition,
            cycles = summary.cycles,
            events = summary.events,
            failures = summary.failures,
            "worker stopped"
        );
        summary
    }

    /// Returns `false` if shutdown interrupted delivery.
    async fn deliver(
        &mut self,
        outcome: &CycleOutcome,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> bool {
        for event in &outcome.events {
            let sink = &self.sink;
            let published = retry_until_ok(
                "publish event",
                &summary.partition,
                self.retry_backoff,
                cancel,
                || sink.publish(event),
            )
            .await;
            if published.is_none() || !self.record(&event.offset, cancel).await {
                return false;
            }
            summary.events += 1;
        }

        self.record(&outcome.state, cancel).await
    }

    async fn record(&mut self, state: &ResumptionState, cancel: &CancellationToken) -> bool {
        if self.last_saved.as_ref() == Some(state) {
            return true;
        }

        let partition = self.worker.partition();
        let offsets = &self.offsets;
        let saved = retry_until_ok(
            "record offset",
            partition,
            self.retry_backoff,
            cancel,
            || save_offset(offsets.as_ref(), partition, state),
        )
        .await;

        if saved.is_none() {
            return false;
        }
        self.last_saved = Some(state.clone());
        true
    }
}

async fn save_offset<R>(
    offsets: &R,
    partition: &SourcePartition,
    state: &ResumptionState,
) -> TapResult<()>
where
    R: OffsetRepository + ?Sized,
{
    let value = serde_json::to_value(state).map_err(|e| TapError::Internal(e.to_string()))?;
    offsets
        .save(&partition.owner, &partition.repository, &value)
        .await?;
    Ok(())
}

/// Repeat `op` with backoff until it succeeds. `None` means cancelled.
async fn retry_until_ok<T, E, Fut>(
    what: &str,
    partition: &SourcePartition,
    base: Duration,
    cancel: &CancellationToken,
    mut op: impl FnMut() -> Fut,
) -> Option<T>
where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Some(value),
            Err(e) => {
                attempt += 1;
                let delay = backoff(base, attempt);
                tracing::warn!(
                    partition = %partition,
                    attempt,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "{what} failed"
                );
                if !sleep_or_cancelled(delay, cancel).await {
                    return None;
                }
            }
        }
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// `false` if cancelled before `delay` elapsed.
async fn sleep_or_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
