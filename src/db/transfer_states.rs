//! Durable TransferState rows.
//!
//! Every write is an upsert that replaces the whole record for its key, so a
//! concurrent reader never observes a half-applied update.

use crate::error::DatabaseError;
use crate::types::DownloadId;
use crate::{Error, Result};

use super::{Database, TransferStateRow};

impl Database {
    /// Insert or fully replace the TransferState row for `row.download_id`
    pub async fn upsert_transfer_state(&self, row: &TransferStateRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transfer_states (
                download_id, downloaded_bytes, total_bytes, resume_token, updated_at
            ) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(download_id) DO UPDATE SET
                downloaded_bytes = excluded.downloaded_bytes,
                total_bytes = excluded.total_bytes,
                resume_token = excluded.resume_token,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(row.download_id)
        .bind(row.downloaded_bytes)
        .bind(row.total_bytes)
        .bind(&row.resume_token)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert transfer state: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get the TransferState row for a download
    pub async fn get_transfer_state(&self, id: DownloadId) -> Result<Option<TransferStateRow>> {
        let row = sqlx::query_as::<_, TransferStateRow>(
            r#"
            SELECT download_id, downloaded_bytes, total_bytes, resume_token, updated_at
            FROM transfer_states
            WHERE download_id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get transfer state: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all TransferState rows
    pub async fn list_transfer_states(&self) -> Result<Vec<TransferStateRow>> {
        let rows = sqlx::query_as::<_, TransferStateRow>(
            r#"
            SELECT download_id, downloaded_bytes, total_bytes, resume_token, updated_at
            FROM transfer_states
            ORDER BY updated_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list transfer states: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Delete the TransferState row for a download
    pub async fn delete_transfer_state(&self, id: DownloadId) -> Result<()> {
        sqlx::query("DELETE FROM transfer_states WHERE download_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete transfer state: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
