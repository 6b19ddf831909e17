pub mod config;
pub mod cursor;
pub mod emitter;
pub mod error;
pub mod fetcher;
pub mod model;
pub mod poller;
pub mod rate_limit;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{PollConfig, RateLimiterConfig};
pub use cursor::{CursorStore, ResumptionState};
pub use emitter::{EventEmitter, OutboundEvent};
pub use error::{CycleError, FetchError, RateLimitError, TranslateError};
pub use fetcher::{Page, PageFetcher, RateLimitSnapshot};
pub use model::{Issue, PullRequestRef, SourcePartition, User};
pub use poller::{CycleOutcome, PollWorker, Poller};
pub use rate_limit::{RateLimiter, RateLimiterStats};
