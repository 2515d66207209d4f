//! Error types for archive-delivery
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Content, Download, Database)
//! - HTTP status code mapping for the API layer
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::types::DownloadId;

/// Result type alias for archive-delivery operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for archive-delivery
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_dir")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Content lookup or range error
    #[error("content error: {0}")]
    Content(#[from] ContentError),

    /// Download-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Folder watching error
    #[error("folder watch error: {0}")]
    FolderWatch(String),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Content delivery errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContentError {
    /// Malformed or unsatisfiable client range input
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// No content exists at the descriptor (or it is empty)
    #[error("content not found: {0}")]
    NotFound(String),

    /// URL does not address deliverable content
    #[error("unsupported content URL: {0}")]
    UnsupportedUrl(String),
}

/// Download-related errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Download has no task record or catalog entry
    #[error("download {id} not found")]
    NotFound {
        /// The download ID that was not found
        id: DownloadId,
    },

    /// Resume was requested but no resume token is on record
    #[error("download {id} has nothing to resume")]
    NothingToResume {
        /// The download ID
        id: DownloadId,
    },

    /// A transfer is already live for this download
    #[error("download {id} is already active")]
    AlreadyActive {
        /// The download ID
        id: DownloadId,
    },

    /// Pause was requested but no transfer is live
    #[error("download {id} is not active")]
    NotActive {
        /// The download ID
        id: DownloadId,
    },

    /// The catalog entry has no usable source URL
    #[error("download {id} has no valid source URL: {reason}")]
    InvalidSource {
        /// The download ID
        id: DownloadId,
        /// Why the URL was rejected
        reason: String,
    },

    /// Transfer engine reported a failure
    #[error("transfer for download {id} failed: {reason}")]
    TransferFailed {
        /// The download ID
        id: DownloadId,
        /// Engine-provided description
        reason: String,
    },
}

/// API error response format
///
/// ```json
/// {
///   "error": {
///     "code": "download_not_found",
///     "message": "download error: download 3f2b... not found",
///     "details": { "download_id": "3f2b..." }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "invalid_range")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Config { .. } => 400,
            Error::Content(ContentError::InvalidRange(_)) => 400,
            Error::Content(ContentError::UnsupportedUrl(_)) => 400,
            Error::Download(DownloadError::InvalidSource { .. }) => 400,

            // 404 Not Found
            Error::Content(ContentError::NotFound(_)) => 404,
            Error::Download(DownloadError::NotFound { .. }) => 404,
            Error::Database(DatabaseError::NotFound(_)) => 404,

            // 409 Conflict - state does not allow the operation
            Error::Download(DownloadError::NothingToResume { .. }) => 409,
            Error::Download(DownloadError::AlreadyActive { .. }) => 409,
            Error::Download(DownloadError::NotActive { .. }) => 409,

            // 502 Bad Gateway - upstream transfer failures
            Error::Download(DownloadError::TransferFailed { .. }) => 502,
            Error::Network(_) => 502,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,

            // 500 Internal Server Error - Server-side issues
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::FolderWatch(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(DatabaseError::NotFound(_)) => "not_found",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Content(e) => match e {
                ContentError::InvalidRange(_) => "invalid_range",
                ContentError::NotFound(_) => "content_not_found",
                ContentError::UnsupportedUrl(_) => "unsupported_url",
            },
            Error::Download(e) => match e {
                DownloadError::NotFound { .. } => "download_not_found",
                DownloadError::NothingToResume { .. } => "nothing_to_resume",
                DownloadError::AlreadyActive { .. } => "already_active",
                DownloadError::NotActive { .. } => "not_active",
                DownloadError::InvalidSource { .. } => "invalid_source",
                DownloadError::TransferFailed { .. } => "transfer_failed",
            },
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::FolderWatch(_) => "folder_watch_error",
            Error::ShuttingDown => "shutting_down",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Download(
                DownloadError::NotFound { id }
                | DownloadError::NothingToResume { id }
                | DownloadError::AlreadyActive { id }
                | DownloadError::NotActive { id },
            ) => Some(serde_json::json!({
                "download_id": id,
            })),
            Error::Download(DownloadError::InvalidSource { id, reason })
            | Error::Download(DownloadError::TransferFailed { id, reason }) => {
                Some(serde_json::json!({
                    "download_id": id,
                    "reason": reason,
                }))
            }
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
