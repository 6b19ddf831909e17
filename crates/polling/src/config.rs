use std::time::Duration;

use chrono::{DateTime, Utc};

/// GitHub caps `per_page` at 100.
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub page_limit: usize,
    pub lookback: chrono::Duration,
    /// Explicit initial watermark; takes precedence over `lookback`.
    pub since: Option<DateTime<Utc>>,
    pub topic: String,
}

impl PollConfig {
    pub fn initial_watermark(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.since.unwrap_or(now - self.lookback)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            page_limit: MAX_PAGE_SIZE,
            lookback: chrono::Duration::days(7),
            since: None,
            topic: "github-issues".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Minimum spacing between two requests, applied even without an upstream budget.
    pub min_interval: Duration,
    /// Pause after a window has been exhausted.
    pub cooldown: Duration,
    /// At or below this many remaining calls, requests are spread evenly until the reset.
    pub low_water: u32,
    /// Upper bound for any single budget wait.
    pub max_wait: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::ZERO,
            cooldown: Duration::from_secs(10),
            low_water: 10,
            max_wait: Duration::from_secs(3600),
        }
    }
}
