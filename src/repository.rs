//! Task and catalog records consumed by the download coordinator
//!
//! [`TaskRepository`] is the seam between the coordinator and wherever the
//! application keeps its catalog; [`Database`] implements it over SQLite.

use std::path::Path;

use async_trait::async_trait;

use crate::db::{CatalogEntry, Database, DownloadTask, NewDownloadTask};
use crate::types::DownloadId;
use crate::Result;

/// CRUD for download task records and the catalog's fetched association
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Catalog entry for a download
    async fn catalog_entry(&self, id: DownloadId) -> Result<Option<CatalogEntry>>;

    /// Record that the entry's content now lives at `local_path`
    async fn mark_fetched(&self, id: DownloadId, local_path: &Path) -> Result<()>;

    /// Create or replace the task record, clearing any previous error
    async fn register_task(&self, task: &NewDownloadTask) -> Result<()>;

    /// Task record for a download
    async fn task(&self, id: DownloadId) -> Result<Option<DownloadTask>>;

    /// All task records
    async fn tasks(&self) -> Result<Vec<DownloadTask>>;

    /// Set or clear the human-readable error on a task record
    async fn set_task_error(&self, id: DownloadId, error: Option<&str>) -> Result<()>;

    /// Delete a task record
    async fn delete_task(&self, id: DownloadId) -> Result<()>;
}

#[async_trait]
impl TaskRepository for Database {
    async fn catalog_entry(&self, id: DownloadId) -> Result<Option<CatalogEntry>> {
        self.get_catalog_entry(id).await
    }

    async fn mark_fetched(&self, id: DownloadId, local_path: &Path) -> Result<()> {
        self.mark_catalog_fetched(id, &local_path.to_string_lossy())
            .await
    }

    async fn register_task(&self, task: &NewDownloadTask) -> Result<()> {
        self.upsert_download_task(task).await
    }

    async fn task(&self, id: DownloadId) -> Result<Option<DownloadTask>> {
        self.get_download_task(id).await
    }

    async fn tasks(&self) -> Result<Vec<DownloadTask>> {
        self.list_download_tasks().await
    }

    async fn set_task_error(&self, id: DownloadId, error: Option<&str>) -> Result<()> {
        self.set_download_task_error(id, error).await
    }

    async fn delete_task(&self, id: DownloadId) -> Result<()> {
        self.delete_download_task(id).await
    }
}
