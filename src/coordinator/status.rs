//! Per-download snapshots for observers.

use std::collections::BTreeSet;

use crate::db::DownloadTask;
use crate::error::{DownloadError, Error, Result};
use crate::transfer::TransferState;
use crate::types::{DownloadId, DownloadInfo, TransferStatus};

use super::DownloadCoordinator;

impl DownloadCoordinator {
    /// Snapshot of one download
    ///
    /// A catalog entry that has been fetched and has no records left reports
    /// as `Completed`. Unknown identifiers are `NotFound`.
    pub async fn get_download(&self, id: DownloadId) -> Result<DownloadInfo> {
        let task = self.repository.task(id).await?;
        let state = self.states.get(id).await;

        if task.is_none() && state.is_none() {
            return match self.repository.catalog_entry(id).await? {
                Some(entry) if entry.local_path.is_some() => Ok(DownloadInfo {
                    id,
                    source_url: entry.source_url,
                    expected_size: entry.size_bytes.max(0) as u64,
                    downloaded_bytes: entry.size_bytes.max(0) as u64,
                    total_bytes: entry.size_bytes.max(0) as u64,
                    has_resume_token: false,
                    error: None,
                    status: TransferStatus::Completed,
                }),
                _ => Err(Error::Download(DownloadError::NotFound { id })),
            };
        }

        let active = self.transfers.lock().await.contains_key(&id);
        Ok(build_info(id, task, state, active))
    }

    /// Snapshots of every download with a task record or TransferState
    pub async fn list_downloads(&self) -> Result<Vec<DownloadInfo>> {
        let tasks = self.repository.tasks().await?;
        let states = self.states.snapshot().await;
        let active = self.transfers.lock().await.clone();

        let ids: BTreeSet<DownloadId> = tasks
            .iter()
            .map(|task| task.download_id)
            .chain(states.iter().map(|(id, _)| *id))
            .collect();

        Ok(ids
            .into_iter()
            .map(|id| {
                let task = tasks.iter().find(|t| t.download_id == id).cloned();
                let state = states
                    .iter()
                    .find(|(state_id, _)| *state_id == id)
                    .map(|(_, state)| state.clone());
                build_info(id, task, state, active.contains_key(&id))
            })
            .collect())
    }
}

fn build_info(
    id: DownloadId,
    task: Option<DownloadTask>,
    state: Option<TransferState>,
    active: bool,
) -> DownloadInfo {
    let state = state.unwrap_or_default();
    let has_resume_token = state.resume_token.is_some();
    let error = task.as_ref().and_then(|t| t.error_message.clone());

    let status = if active {
        TransferStatus::Downloading
    } else if error.is_some() {
        TransferStatus::Failed
    } else if has_resume_token {
        TransferStatus::Paused
    } else {
        TransferStatus::NotStarted
    };

    DownloadInfo {
        id,
        source_url: task
            .as_ref()
            .map(|t| t.source_url.clone())
            .unwrap_or_default(),
        expected_size: task.as_ref().map_or(0, |t| t.expected_size.max(0) as u64),
        downloaded_bytes: state.downloaded_bytes,
        total_bytes: state.total_bytes,
        has_resume_token,
        error,
        status,
    }
}
