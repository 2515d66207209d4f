//! Catalog entries and their fetched/not-fetched association.

use crate::error::DatabaseError;
use crate::types::DownloadId;
use crate::{Error, Result};

use super::{CatalogEntry, Database};

impl Database {
    /// Insert or replace a catalog entry
    ///
    /// Replacing an entry keeps its local path, so refreshing the catalog does
    /// not forget content that was already fetched.
    pub async fn upsert_catalog_entry(&self, entry: &CatalogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO catalog (content_id, name, source_url, size_bytes, local_path)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(content_id) DO UPDATE SET
                name = excluded.name,
                source_url = excluded.source_url,
                size_bytes = excluded.size_bytes,
                local_path = COALESCE(excluded.local_path, catalog.local_path)
            "#,
        )
        .bind(entry.content_id)
        .bind(&entry.name)
        .bind(&entry.source_url)
        .bind(entry.size_bytes)
        .bind(&entry.local_path)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert catalog entry: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a catalog entry by content ID
    pub async fn get_catalog_entry(&self, id: DownloadId) -> Result<Option<CatalogEntry>> {
        let row = sqlx::query_as::<_, CatalogEntry>(
            r#"
            SELECT content_id, name, source_url, size_bytes, local_path
            FROM catalog
            WHERE content_id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get catalog entry: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List catalog entries, optionally only those already fetched
    pub async fn list_catalog_entries(&self, fetched_only: bool) -> Result<Vec<CatalogEntry>> {
        let sql = if fetched_only {
            r#"
            SELECT content_id, name, source_url, size_bytes, local_path
            FROM catalog
            WHERE local_path IS NOT NULL
            ORDER BY name ASC
            "#
        } else {
            r#"
            SELECT content_id, name, source_url, size_bytes, local_path
            FROM catalog
            ORDER BY name ASC
            "#
        };

        let rows = sqlx::query_as::<_, CatalogEntry>(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list catalog entries: {}",
                    e
                )))
            })?;

        Ok(rows)
    }

    /// Associate a catalog entry with its fetched local file
    ///
    /// Returns `DatabaseError::NotFound` if the entry does not exist.
    pub async fn mark_catalog_fetched(&self, id: DownloadId, local_path: &str) -> Result<()> {
        let result = sqlx::query("UPDATE catalog SET local_path = ? WHERE content_id = ?")
            .bind(local_path)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to mark catalog entry fetched: {}",
                    e
                )))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "catalog entry {}",
                id
            ))));
        }

        Ok(())
    }

    /// Forget the local file of a catalog entry (content unlinked by the user)
    pub async fn clear_catalog_fetched(&self, id: DownloadId) -> Result<()> {
        sqlx::query("UPDATE catalog SET local_path = NULL WHERE content_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear catalog entry: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
