use thiserror::Error;

use crate::fetcher::RateLimitSnapshot;

/// Failure of a single page request. None of these leave partial state behind.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("rate limit exhausted until {}", .0.reset_at)]
    RateLimited(RateLimitSnapshot),

    #[error("malformed page payload: {0}")]
    Decode(String),

    #[error("upstream rejected request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_) | FetchError::RateLimited(_))
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("wait cancelled by shutdown")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("issue #{number} has no author")]
    MissingAuthor { number: u64 },
}

/// Why a poll cycle produced nothing. The cursor is untouched in every case.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("translation failed: {0}")]
    Translate(#[from] TranslateError),

    #[error("cycle cancelled")]
    Cancelled,
}

impl From<RateLimitError> for CycleError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Cancelled => CycleError::Cancelled,
        }
    }
}

impl CycleError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CycleError::Fetch(e) if e.is_transient())
    }

    /// The page could not be turned into events: bad payload or an untranslatable entity.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            CycleError::Fetch(FetchError::Decode(_)) | CycleError::Translate(_)
        )
    }
}
