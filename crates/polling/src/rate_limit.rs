use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RateLimiterConfig;
use crate::error::RateLimitError;
use crate::fetcher::RateLimitSnapshot;

struct Budget {
    /// Calls left in the current upstream window, `None` when unknown.
    remaining: Option<u32>,
    reset_at: Option<Instant>,
    /// Upstream identity of the current window.
    window: Option<DateTime<Utc>>,
    /// Earliest instant the next request may start.
    next_slot: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimiterStats {
    pub requests: u64,
    pub throttled: Duration,
    pub cooldowns: u64,
}

/// Request budget shared by every worker talking to the same account.
///
/// Reservations are linearised under one lock: each `acquire` takes the next
/// free slot and decrements the remaining budget before sleeping, so
/// concurrent workers never spend the same call twice.
pub struct RateLimiter {
    config: RateLimiterConfig,
    budget: Mutex<Budget>,
    requests: AtomicU64,
    throttled_ns: AtomicU64,
    cooldowns: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            budget: Mutex::new(Budget {
                remaining: None,
                reset_at: None,
                window: None,
                next_slot: Instant::now(),
            }),
            requests: AtomicU64::new(0),
            throttled_ns: AtomicU64::new(0),
            cooldowns: AtomicU64::new(0),
        }
    }

    /// Record the budget reported with an upstream response.
    ///
    /// Within the same upstream window the lower count wins: a response that
    /// was in flight while other workers reserved calls reports a stale budget.
    pub fn observe(&self, snapshot: &RateLimitSnapshot) {
        let reset_in = (snapshot.reset_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(self.config.max_wait);

        let mut budget = self.lock();
        match (budget.window, budget.remaining) {
            (Some(window), Some(remaining)) if window == snapshot.reset_at => {
                budget.remaining = Some(remaining.min(snapshot.remaining));
            }
            _ => {
                budget.remaining = Some(snapshot.remaining);
                budget.reset_at = Some(Instant::now() + reset_in);
                budget.window = Some(snapshot.reset_at);
            }
        }

        tracing::debug!(
            remaining = budget.remaining,
            reset_in_secs = reset_in.as_secs(),
            "rate budget updated"
        );
    }

    /// Wait until a request may be issued. Returns how long it waited.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Duration, RateLimitError> {
        let wait = self.reserve();
        self.requests.fetch_add(1, Ordering::Relaxed);

        if !wait.is_zero() {
            self.throttled_ns
                .fetch_add(wait.as_nanos() as u64, Ordering::Relaxed);
            tracing::debug!(wait_ms = wait.as_millis() as u64, "throttling request");
        }

        sleep_or_cancel(wait, cancel).await?;
        Ok(wait)
    }

    /// Mandatory pause after a window was drained, so an idle repository is
    /// not polled back to back.
    pub async fn mark_batch_boundary(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        self.cooldowns.fetch_add(1, Ordering::Relaxed);
        sleep_or_cancel(self.config.cooldown, cancel).await
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            requests: self.requests.load(Ordering::Relaxed),
            throttled: Duration::from_nanos(self.throttled_ns.load(Ordering::Relaxed)),
            cooldowns: self.cooldowns.load(Ordering::Relaxed),
        }
    }

    fn reserve(&self) -> Duration {
        let now = Instant::now();
        let mut budget = self.lock();
        let mut start = budget.next_slot.max(now);

        if let (Some(remaining), Some(reset_at)) = (budget.remaining, budget.reset_at) {
            if reset_at <= start {
                // upstream window rolled over; unknown until the next response
                budget.remaining = None;
                budget.reset_at = None;
                budget.window = None;
            } else if remaining == 0 {
                tracing::info!(
                    wait_secs = reset_at.saturating_duration_since(now).as_secs(),
                    "rate budget exhausted, waiting for reset"
                );
                start = reset_at;
                budget.remaining = None;
                budget.reset_at = None;
                budget.window = None;
            } else {
                if remaining <= self.config.low_water {
                    start += reset_at.saturating_duration_since(start) / remaining;
                }
                budget.remaining = Some(remaining - 1);
            }
        }

        budget.next_slot = start + self.config.min_interval;
        start.saturating_duration_since(now)
    }

    fn lock(&self) -> MutexGuard<'_, Budget> {
        self.budget.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn sleep_or_cancel(wait: Duration, cancel: &CancellationToken) -> Result<(), RateLimitError> {
    if wait.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RateLimitError::Cancelled),
        _ = tokio::time::sleep(wait) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn config() -> RateLimiterConfig {
        RateLimiterConfig {
            min_interval: Duration::ZERO,
            cooldown: Duration::from_secs(10),
            low_water: 0,
            max_wait: Duration::from_secs(3600),
        }
    }

    fn snapshot(remaining: u32, reset_in_secs: i64) -> RateLimitSnapshot {
        RateLimitSnapshot {
            remaining,
            reset_at: Utc::now() + chrono::Duration::seconds(reset_in_secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_budget_signal_means_no_wait() {
        let limiter = RateLimiter::new(config());
        let cancel = CancellationToken::new();
        for _ in 0..5 {
            assert_eq!(limiter.acquire(&cancel).await.unwrap(), Duration::ZERO);
        }
        assert_eq!(limiter.stats().requests, 5);
        assert_eq!(limiter.stats().throttled, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn min_interval_spaces_requests() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            min_interval: Duration::from_millis(500),
            ..config()
        });
        let cancel = CancellationToken::new();

        assert_eq!(limiter.acquire(&cancel).await.unwrap(), Duration::ZERO);
        assert_eq!(
            limiter.acquire(&cancel).await.unwrap(),
            Duration::from_millis(500)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_waits_for_reset() {
        let limiter = RateLimiter::new(config());
        let cancel = CancellationToken::new();
        limiter.observe(&snapshot(0, 30));

        let waited = limiter.acquire(&cancel).await.unwrap();
        assert!(waited > Duration::from_secs(28), "waited {waited:?}");
        assert!(waited <= Duration::from_secs(30), "waited {waited:?}");

        // after the reset the budget is unknown again
        assert_eq!(limiter.acquire(&cancel).await.unwrap(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_is_decremented_per_acquire() {
        let limiter = RateLimiter::new(config());
        let cancel = CancellationToken::new();
        limiter.observe(&snapshot(2, 60));

        assert_eq!(limiter.acquire(&cancel).await.unwrap(), Duration::ZERO);
        assert_eq!(limiter.acquire(&cancel).await.unwrap(), Duration::ZERO);
        let third = limiter.acquire(&cancel).await.unwrap();
        assert!(third > Duration::from_secs(58), "waited {third:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_snapshot_does_not_restore_spent_budget() {
        let limiter = RateLimiter::new(config());
        let cancel = CancellationToken::new();
        let reset_at = Utc::now() + chrono::Duration::seconds(60);

        limiter.observe(&RateLimitSnapshot {
            remaining: 5,
            reset_at,
        });
        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();

        // a response issued before those two reservations arrives late
        limiter.observe(&RateLimitSnapshot {
            remaining: 4,
            reset_at,
        });
        assert_eq!(limiter.lock().remaining, Some(3));

        // a lower count from the same window is taken as is
        limiter.observe(&RateLimitSnapshot {
            remaining: 1,
            reset_at,
        });
        assert_eq!(limiter.lock().remaining, Some(1));

        // a new window replaces the budget
        limiter.observe(&RateLimitSnapshot {
            remaining: 5000,
            reset_at: reset_at + chrono::Duration::hours(1),
        });
        assert_eq!(limiter.lock().remaining, Some(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn low_budget_spreads_requests_until_reset() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            low_water: 10,
            ..config()
        });
        let cancel = CancellationToken::new();
        limiter.observe(&snapshot(5, 50));

        let waited = limiter.acquire(&cancel).await.unwrap();
        assert!(waited > Duration::from_secs(9), "waited {waited:?}");
        assert!(waited <= Duration::from_secs(10), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn shared_limiter_serialises_concurrent_workers() {
        let limiter = Arc::new(RateLimiter::new(config()));
        let cancel = CancellationToken::new();
        limiter.observe(&snapshot(1, 60));

        let (a, b) = tokio::join!(limiter.acquire(&cancel), limiter.acquire(&cancel));
        let mut waits = [a.unwrap(), b.unwrap()];
        waits.sort();
        assert_eq!(waits[0], Duration::ZERO);
        assert!(waits[1] > Duration::from_secs(58), "waited {:?}", waits[1]);
        assert_eq!(limiter.stats().requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_is_cancellable() {
        let limiter = RateLimiter::new(config());
        let cancel = CancellationToken::new();
        limiter.observe(&snapshot(0, 600));
        cancel.cancel();

        assert_eq!(
            limiter.acquire(&cancel).await.unwrap_err(),
            RateLimitError::Cancelled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn batch_boundary_sleeps_cooldown() {
        let limiter = RateLimiter::new(config());
        let cancel = CancellationToken::new();

        let started = Instant::now();
        limiter.mark_batch_boundary(&cancel).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(limiter.stats().cooldowns, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_boundary_is_cancellable() {
        let limiter = RateLimiter::new(config());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            limiter.mark_batch_boundary(&cancel).await.unwrap_err(),
            RateLimitError::Cancelled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reset_wait_is_capped() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_wait: Duration::from_secs(5),
            ..config()
        });
        let cancel = CancellationToken::new();
        limiter.observe(&snapshot(0, 7200));
        assert!(limiter.acquire(&cancel).await.unwrap() <= Duration::from_secs(5));
    }
}
