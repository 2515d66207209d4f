//! Database layer for archive-delivery
//!
//! Handles SQLite persistence for transfer state, download tasks and the
//! catalog of fetchable content.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`transfer_states`] - Durable TransferState rows (byte counters and resume tokens)
//! - [`tasks`] - Download task records (source URL, expected size, error)
//! - [`catalog`] - Catalog entries and their fetched/not-fetched association
//! - [`state`] - Runtime state (shutdown tracking)

use crate::types::DownloadId;
use sqlx::{FromRow, sqlite::SqlitePool};

mod catalog;
mod migrations;
mod state;
mod tasks;
mod transfer_states;

/// Durable TransferState row
#[derive(Debug, Clone, FromRow)]
pub struct TransferStateRow {
    /// Download this state belongs to
    pub download_id: DownloadId,
    /// Bytes received so far
    pub downloaded_bytes: i64,
    /// Bytes expected in total (0 when unknown)
    pub total_bytes: i64,
    /// Opaque engine resume token, if paused or failed with recoverable data
    pub resume_token: Option<Vec<u8>>,
    /// Unix timestamp of the last write
    pub updated_at: i64,
}

/// New download task to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewDownloadTask {
    /// Download ID (same as the catalog entry it fetches)
    pub download_id: DownloadId,
    /// URL the engine fetches
    pub source_url: String,
    /// Size advertised by the catalog
    pub expected_size: i64,
}

/// Download task record from database
#[derive(Debug, Clone, FromRow)]
pub struct DownloadTask {
    /// Download ID
    pub download_id: DownloadId,
    /// URL the engine fetches
    pub source_url: String,
    /// Size advertised by the catalog
    pub expected_size: i64,
    /// Human-readable error from the last failed transfer
    pub error_message: Option<String>,
    /// Unix timestamp when the task was registered
    pub created_at: i64,
}

/// Catalog entry: one fetchable piece of content
#[derive(Debug, Clone, FromRow)]
pub struct CatalogEntry {
    /// Content ID (doubles as the download ID when fetched)
    pub content_id: DownloadId,
    /// Display name
    pub name: String,
    /// Download URL advertised by the catalog
    pub source_url: String,
    /// Size in bytes advertised by the catalog
    pub size_bytes: i64,
    /// Local path once the content has been fetched
    pub local_path: Option<String>,
}

/// Database handle for archive-delivery
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
