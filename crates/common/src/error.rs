use thiserror::Error;

#[derive(Debug, Error)]
pub enum TapError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TapError {
    /// Configuration errors are raised before any worker starts and are never retried.
    pub fn is_config(&self) -> bool {
        matches!(self, TapError::Config(_))
    }
}

pub type TapResult<T> = Result<T, TapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category() {
        let err = TapError::Config("GITHUB_REPOSITORIES is required but not set".into());
        assert_eq!(
            err.to_string(),
            "configuration error: GITHUB_REPOSITORIES is required but not set"
        );
        assert!(err.is_config());
        assert!(!TapError::Database("down".into()).is_config());
    }
}
