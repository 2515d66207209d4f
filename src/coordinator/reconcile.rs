//! Cold-start reconciliation with the engine's live tasks.

use std::collections::HashSet;

use crate::error::Result;
use crate::types::Event;

use super::{DownloadCoordinator, LiveTransfer};

/// Task error for records whose transfer vanished without resume data
pub(crate) const INTERRUPTED: &str = "interrupted";

impl DownloadCoordinator {
    /// Re-synchronize with the transfers the engine is still running
    ///
    /// The engine is authoritative: byte counters of every live transfer
    /// overwrite whatever was persisted, and the download is tracked as
    /// active again. Live transfers without a task record are canceled.
    /// Task records with neither a live transfer, a resume token nor an
    /// error are marked [`INTERRUPTED`] so they show up as failed.
    ///
    /// Runs automatically on construction and is safe to call again.
    pub async fn restart_if_needed(&self) -> Result<()> {
        let _ops = self.ops.lock().await;

        let live = self.engine.live_tasks().await;
        let mut adopted = HashSet::new();

        for task in live {
            let id = task.tag;
            if self.repository.task(id).await?.is_none() {
                tracing::warn!(download_id = %id, "canceling live transfer without a task record");
                self.engine.cancel(id).await;
                continue;
            }

            if self
                .states
                .update_progress(id, task.received_bytes, task.expected_bytes)
                .await
            {
                self.emit_event(Event::Progress {
                    id,
                    downloaded_bytes: task.received_bytes,
                    total_bytes: task.expected_bytes,
                });
            }
            self.transfers
                .lock()
                .await
                .entry(id)
                .or_insert(LiveTransfer::downloading(task.generation));
            adopted.insert(id);
        }

        let mut interrupted = 0usize;
        for task in self.repository.tasks().await? {
            let id = task.download_id;
            if adopted.contains(&id) || self.transfers.lock().await.contains_key(&id) {
                continue;
            }
            if task.error_message.is_some() || self.states.resume_token_for(id).await.is_some() {
                continue;
            }
            tracing::warn!(download_id = %id, "transfer was lost without resume data");
            self.repository.set_task_error(id, Some(INTERRUPTED)).await?;
            interrupted += 1;
        }

        self.states.flush().await?;
        tracing::info!(
            adopted = adopted.len(),
            interrupted,
            "reconciled with transfer engine"
        );
        Ok(())
    }
}
