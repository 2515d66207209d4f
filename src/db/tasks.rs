//! Download task records: source URL, expected size and last error.

use crate::error::DatabaseError;
use crate::types::DownloadId;
use crate::{Error, Result};

use super::{Database, DownloadTask, NewDownloadTask};

impl Database {
    /// Register a download task, replacing any previous record for the same ID
    ///
    /// Re-registering clears a stale error message.
    pub async fn upsert_download_task(&self, task: &NewDownloadTask) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO download_tasks (
                download_id, source_url, expected_size, error_message, created_at
            ) VALUES (?, ?, ?, NULL, ?)
            ON CONFLICT(download_id) DO UPDATE SET
                source_url = excluded.source_url,
                expected_size = excluded.expected_size,
                error_message = NULL
            "#,
        )
        .bind(task.download_id)
        .bind(&task.source_url)
        .bind(task.expected_size)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert download task: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a download task by ID
    pub async fn get_download_task(&self, id: DownloadId) -> Result<Option<DownloadTask>> {
        let row = sqlx::query_as::<_, DownloadTask>(
            r#"
            SELECT download_id, source_url, expected_size, error_message, created_at
            FROM download_tasks
            WHERE download_id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get download task: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all download tasks, oldest first
    pub async fn list_download_tasks(&self) -> Result<Vec<DownloadTask>> {
        let rows = sqlx::query_as::<_, DownloadTask>(
            r#"
            SELECT download_id, source_url, expected_size, error_message, created_at
            FROM download_tasks
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list download tasks: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Set or clear the error message on a download task
    pub async fn set_download_task_error(
        &self,
        id: DownloadId,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE download_tasks SET error_message = ? WHERE download_id = ?")
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set download task error: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Delete a download task
    pub async fn delete_download_task(&self, id: DownloadId) -> Result<()> {
        sqlx::query("DELETE FROM download_tasks WHERE download_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete download task: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
