//! Error types for sources and the store.

use crate::types::CourseId;
use thiserror::Error;

/// Main error type for source and store operations.
///
/// Errors are `Clone` because a single upstream failure is delivered to
/// every attachment of a shared source.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request failed with status code: {status} ({url})")]
    HttpStatus { status: u16, url: String },

    #[error("Course not found: {0}")]
    NotFound(CourseId),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid changes: {0}")]
    InvalidChanges(String),

    #[error("No async runtime: {0}")]
    NoRuntime(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        last: Box<StoreError>,
    },
}

impl StoreError {
    /// Status code carried by an HTTP failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::HttpStatus { status, .. } => Some(*status),
            StoreError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for source and store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_message_includes_code() {
        let err = StoreError::HttpStatus {
            status: 503,
            url: "/api/courses".to_string(),
        };
        assert!(err.to_string().contains("status code: 503"));
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn test_exhausted_reports_last_status() {
        let err = StoreError::RetriesExhausted {
            attempts: 4,
            last: Box::new(StoreError::HttpStatus {
                status: 500,
                url: "/api/courses".to_string(),
            }),
        };
        assert_eq!(err.status(), Some(500));
        assert!(err.to_string().starts_with("Gave up after 4 attempts"));
    }

    #[test]
    fn test_from_json_error() {
        let err: StoreError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
