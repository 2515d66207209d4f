//! Handling of unsolicited engine outcomes.
//!
//! Every report is matched against the generation of the download's live
//! transfer; reports from an earlier transfer of the same download are
//! dropped. Progress only needs the transfer to still be downloading.
//! Finished and failed transfers go through the operation lock; a failure
//! reported while a pause is collecting resume data is that pause's own echo
//! and is dropped too.

use std::path::PathBuf;

use url::Url;

use crate::engine::EngineEvent;
use crate::error::Result;
use crate::placement::{file_name_for, place_artifact};
use crate::types::{DownloadId, Event};

use super::{DownloadCoordinator, Phase};

impl DownloadCoordinator {
    pub(crate) async fn handle_engine_event(&self, event: EngineEvent) {
        let tag = event.tag();
        let generation = event.generation();
        let result = match event {
            EngineEvent::Progress {
                tag,
                received_bytes,
                expected_bytes,
                ..
            } => {
                self.on_progress(tag, generation, received_bytes, expected_bytes)
                    .await;
                Ok(())
            }
            EngineEvent::Finished {
                tag,
                temp_path,
                http_status,
                ..
            } => self.on_finished(tag, generation, temp_path, http_status).await,
            EngineEvent::Failed {
                tag,
                error,
                resume_data,
                ..
            } => self.on_failed(tag, generation, error, resume_data).await,
        };

        if let Err(e) = result {
            tracing::error!(download_id = %tag, generation, error = %e, "failed to record transfer outcome");
        }
    }

    async fn on_progress(&self, id: DownloadId, generation: u64, downloaded: u64, total: u64) {
        // Held across the update so a concurrent cancel or completion cannot
        // clear the record in between and have it re-created here
        let transfers = self.transfers.lock().await;
        if !transfers.get(&id).is_some_and(|t| t.accepts(generation)) {
            tracing::trace!(download_id = %id, generation, "dropping progress for inactive transfer");
            return;
        }
        let applied = self.states.update_progress(id, downloaded, total).await;
        drop(transfers);

        if applied {
            self.emit_event(Event::Progress {
                id,
                downloaded_bytes: downloaded,
                total_bytes: total,
            });
        }
    }

    async fn on_finished(
        &self,
        id: DownloadId,
        generation: u64,
        temp_path: PathBuf,
        http_status: u16,
    ) -> Result<()> {
        let _ops = self.ops.lock().await;

        let mut transfers = self.transfers.lock().await;
        let current = transfers.get(&id).copied();
        if current.is_some_and(|t| t.generation != generation) {
            // The partial file now belongs to the newer transfer
            tracing::debug!(download_id = %id, generation, "ignoring completion of an earlier transfer");
            return Ok(());
        }
        transfers.remove(&id);
        drop(transfers);

        if current.is_none() {
            // A transfer that completed while being paused still has its task
            // record and no token; anything else is stale
            let task = self.repository.task(id).await?;
            let paused = self.states.resume_token_for(id).await.is_some();
            if task.is_none() || paused {
                tracing::debug!(download_id = %id, "ignoring completion of inactive transfer");
                if task.is_none() {
                    let _ = tokio::fs::remove_file(&temp_path).await;
                }
                return Ok(());
            }
        }

        if !(200..300).contains(&http_status) {
            let error = format!("HTTP status {}", http_status);
            tracing::error!(download_id = %id, http_status, "transfer finished with error status");
            let _ = tokio::fs::remove_file(&temp_path).await;
            self.states.reset(id).await?;
            self.repository.delete_task(id).await?;
            self.emit_event(Event::Failed {
                id,
                error,
                resumable: false,
            });
            return Ok(());
        }

        let fallback = id.to_string();
        let file_name = self
            .repository
            .task(id)
            .await?
            .and_then(|task| Url::parse(&task.source_url).ok())
            .map(|url| file_name_for(&url, &fallback))
            .unwrap_or(fallback);

        let placed = place_artifact(
            &temp_path,
            self.config.download_dir(),
            &file_name,
            self.config.download.max_name_attempts,
        )
        .await;

        let path = match placed {
            Ok(path) => path,
            Err(e) => {
                let error = format!("failed to place fetched file: {}", e);
                tracing::error!(download_id = %id, error = %e, "could not move finished transfer into place");
                let _ = tokio::fs::remove_file(&temp_path).await;
                self.states.update_resume_token(id, None).await?;
                self.repository.set_task_error(id, Some(&error)).await?;
                self.emit_event(Event::Failed {
                    id,
                    error,
                    resumable: false,
                });
                return Ok(());
            }
        };

        if let Err(e) = self.repository.mark_fetched(id, &path).await {
            tracing::warn!(download_id = %id, error = %e, "could not mark catalog entry as fetched");
        }
        self.states.reset(id).await?;
        self.repository.delete_task(id).await?;

        tracing::info!(download_id = %id, path = %path.display(), "download completed");
        self.emit_event(Event::Completed { id, path });
        Ok(())
    }

    async fn on_failed(
        &self,
        id: DownloadId,
        generation: u64,
        error: String,
        resume_data: Option<Vec<u8>>,
    ) -> Result<()> {
        let pausing = self
            .transfers
            .lock()
            .await
            .get(&id)
            .is_some_and(|t| t.phase == Phase::Pausing && t.generation == generation);
        if pausing {
            tracing::debug!(download_id = %id, generation, "ignoring failure echo of a pause");
            return Ok(());
        }

        let _ops = self.ops.lock().await;
        // The pause may have finished, and a resume started a newer
        // transfer, while we waited for the lock
        let mut transfers = self.transfers.lock().await;
        if !transfers.get(&id).is_some_and(|t| t.accepts(generation)) {
            tracing::debug!(download_id = %id, generation, "ignoring failure of inactive transfer");
            return Ok(());
        }
        transfers.remove(&id);
        drop(transfers);

        let resumable = resume_data.is_some();
        self.states.update_resume_token(id, resume_data).await?;
        self.repository.set_task_error(id, Some(&error)).await?;

        tracing::error!(download_id = %id, error = %error, resumable, "transfer failed");
        self.emit_event(Event::Failed {
            id,
            error,
            resumable,
        });
        Ok(())
    }
}
