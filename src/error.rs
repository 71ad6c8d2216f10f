//! Error types for the cache, query and upload layers
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::UploadErrorResponse;

// == Cache Error Enum ==
/// Error type for cache lookups and cache persistence.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache (or expired)
    #[error("Key not found: {0}")]
    NotFound(String),

    /// No cache tier with that name
    #[error("Unknown cache tier: {0}")]
    UnknownTier(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Persistent storage could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// Persisted blob could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error from a storage backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CacheError::NotFound(_) | CacheError::UnknownTier(_) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            CacheError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            CacheError::Storage(_) | CacheError::Serialization(_) | CacheError::Io(_) => {
                // Internal details stay in the log.
                tracing::error!(error = %self, "cache storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

// == Query Error Enum ==
/// Error surfaced by the query layer.
///
/// Cloneable so a single deduplicated fetch can hand the same outcome to
/// every waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The fetcher returned an error
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// The fetch or its retry backoff was cancelled
    #[error("Query cancelled")]
    Cancelled,

    /// The query is disabled and was not executed
    #[error("Query disabled: {0}")]
    Disabled(String),
}

// == Upload Error Enum ==
/// Rejection produced by the upload validation gate.
///
/// Every variant maps to a stable `errorCode` and is reported as HTTP 400.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("No files were uploaded")]
    NoFiles,

    #[error("A maximum of {0} files is allowed")]
    TooManyFiles(usize),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    FileTooLarge(String),

    #[error("{0}")]
    InvalidMimeType(String),

    #[error("{0}")]
    InvalidExtension(String),

    #[error("{0}")]
    RequiredDocumentMissing(String),
}

impl UploadError {
    /// Stable machine-readable code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::NoFiles => "NO_FILES",
            UploadError::TooManyFiles(_) => "TOO_MANY_FILES",
            UploadError::Validation(_) => "VALIDATION_ERROR",
            UploadError::FileTooLarge(_) => "FILE_TOO_LARGE",
            UploadError::InvalidMimeType(_) => "INVALID_MIME_TYPE",
            UploadError::InvalidExtension(_) => "INVALID_EXTENSION",
            UploadError::RequiredDocumentMissing(_) => "REQUIRED_DOCUMENT_MISSING",
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        tracing::warn!(code = self.code(), error = %self, "upload rejected");
        let body = Json(UploadErrorResponse::new(self.to_string(), self.code()));
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_error_codes() {
        assert_eq!(UploadError::NoFiles.code(), "NO_FILES");
        assert_eq!(UploadError::TooManyFiles(20).code(), "TOO_MANY_FILES");
        assert_eq!(
            UploadError::Validation("bad".into()).code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            UploadError::RequiredDocumentMissing("RG".into()).code(),
            "REQUIRED_DOCUMENT_MISSING"
        );
    }

    #[test]
    fn test_upload_error_is_bad_request() {
        let response = UploadError::InvalidExtension(".exe".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_storage_error_hides_details() {
        let response = CacheError::Storage("disk on fire at /var/secret".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_not_found_status() {
        let response = CacheError::NotFound("k".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
