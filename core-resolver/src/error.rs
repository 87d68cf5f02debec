//! # Resolution Error Types

use bridge_traits::ExtractError;
use thiserror::Error;

/// Final outcome of a failed [`Resolver::resolve`](crate::Resolver::resolve).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// Nothing playable matched the reference.
    #[error("Nothing found for {0}")]
    NotFound(String),

    /// Every attempt ran out of time (pool wait included).
    #[error("Resolution timed out")]
    Timeout,

    /// The reference is not something the extractor can play.
    #[error("Unsupported source: {0}")]
    Unsupported(String),

    /// The extraction service kept failing.
    #[error("Extraction service error: {0}")]
    Upstream(String),
}

impl ResolutionError {
    /// Returns `true` if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolutionError::Timeout | ResolutionError::Upstream(_))
    }
}

impl From<ExtractError> for ResolutionError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::NotFound(source) => ResolutionError::NotFound(source),
            ExtractError::Unsupported(source) => ResolutionError::Unsupported(source),
            ExtractError::Upstream(message) => ResolutionError::Upstream(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, ResolutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ResolutionError::Timeout.is_retryable());
        assert!(ResolutionError::Upstream("503".into()).is_retryable());
        assert!(!ResolutionError::NotFound("x".into()).is_retryable());
        assert!(!ResolutionError::Unsupported("ftp://x".into()).is_retryable());
    }

    #[test]
    fn test_from_extract_error() {
        let err: ResolutionError = ExtractError::Upstream("HTTP 429".into()).into();
        assert_eq!(err, ResolutionError::Upstream("HTTP 429".into()));
    }
}
