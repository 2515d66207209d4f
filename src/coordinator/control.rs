//! Download lifecycle control (start/pause/resume/cancel).

use std::sync::atomic::Ordering;

use url::Url;

use crate::db::NewDownloadTask;
use crate::error::{DownloadError, Error, Result};
use crate::placement::strip_meta4;
use crate::types::{DownloadId, Event};

use super::{DownloadCoordinator, LiveTransfer, Phase};

/// Task error recorded when a pause could not produce resume data
pub(crate) const UNRESUMABLE_PAUSE: &str = "transfer cannot be resumed";

impl DownloadCoordinator {
    /// Start fetching the catalog entry `id`
    ///
    /// Looks up the source URL and expected size in the catalog, registers a
    /// task record and hands the transfer to the engine tagged with `id`.
    /// Any TransferState left from an earlier attempt is discarded.
    pub async fn start(&self, id: DownloadId) -> Result<()> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let _ops = self.ops.lock().await;
        if self.transfers.lock().await.contains_key(&id) {
            return Err(Error::Download(DownloadError::AlreadyActive { id }));
        }

        let entry = self
            .repository
            .catalog_entry(id)
            .await?
            .ok_or(Error::Download(DownloadError::NotFound { id }))?;

        let url = Url::parse(&entry.source_url).map_err(|e| {
            Error::Download(DownloadError::InvalidSource {
                id,
                reason: e.to_string(),
            })
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Download(DownloadError::InvalidSource {
                id,
                reason: format!("unsupported scheme '{}'", url.scheme()),
            }));
        }
        let url = strip_meta4(&url);
        let expected = entry.size_bytes.max(0) as u64;

        self.repository
            .register_task(&NewDownloadTask {
                download_id: id,
                source_url: url.to_string(),
                expected_size: entry.size_bytes,
            })
            .await?;
        self.states.reset(id).await?;
        self.states.update_progress(id, 0, expected).await;

        // Held across the engine call so reports of the new transfer wait
        // until its generation is on record
        let mut transfers = self.transfers.lock().await;
        let generation = match self.engine.start(id, url.clone(), expected).await {
            Ok(generation) => generation,
            Err(e) => {
                drop(transfers);
                tracing::error!(download_id = %id, error = %e, "engine refused to start transfer");
                self.repository
                    .set_task_error(id, Some(&e.to_string()))
                    .await?;
                return Err(e);
            }
        };
        transfers.insert(id, LiveTransfer::downloading(generation));
        drop(transfers);

        tracing::info!(download_id = %id, url = %url, expected, generation, "download started");
        self.emit_event(Event::Started { id });
        Ok(())
    }

    /// Pause a live transfer, keeping what it received
    ///
    /// When the engine hands back resume data it is stored durably before
    /// this returns. Without resume data the download is recorded as failed
    /// and cannot be resumed; that is reported through a `Failed` event, not
    /// as an error.
    pub async fn pause(&self, id: DownloadId) -> Result<()> {
        let _ops = self.ops.lock().await;

        match self.transfers.lock().await.get_mut(&id) {
            Some(transfer) if transfer.phase == Phase::Downloading => {
                transfer.phase = Phase::Pausing
            }
            _ => return Err(Error::Download(DownloadError::NotActive { id })),
        }

        let resume_data = self.engine.cancel_with_resume_data(id).await;

        let resumable = resume_data.is_some();
        let stored = self.states.update_resume_token(id, resume_data).await;
        self.transfers.lock().await.remove(&id);
        stored?;

        if resumable {
            tracing::info!(download_id = %id, "download paused");
            self.emit_event(Event::Paused { id });
        } else {
            tracing::warn!(download_id = %id, "engine returned no resume data, download cannot be resumed");
            self.repository
                .set_task_error(id, Some(UNRESUMABLE_PAUSE))
                .await?;
            self.emit_event(Event::Failed {
                id,
                error: UNRESUMABLE_PAUSE.to_string(),
                resumable: false,
            });
        }
        Ok(())
    }

    /// Continue a paused or resumably failed download from its stored token
    ///
    /// Returns [`DownloadError::NothingToResume`] when no token is on record;
    /// nothing else changes in that case.
    pub async fn resume(&self, id: DownloadId) -> Result<()> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let _ops = self.ops.lock().await;
        if self.transfers.lock().await.contains_key(&id) {
            return Err(Error::Download(DownloadError::AlreadyActive { id }));
        }

        let Some(token) = self.states.resume_token_for(id).await else {
            tracing::warn!(download_id = %id, "resume requested without a stored resume token");
            return Err(Error::Download(DownloadError::NothingToResume { id }));
        };

        let mut transfers = self.transfers.lock().await;
        let generation = match self.engine.start_from_token(id, &token).await {
            Ok(generation) => generation,
            Err(e) => {
                drop(transfers);
                tracing::error!(download_id = %id, error = %e, "engine could not continue transfer");
                self.repository
                    .set_task_error(id, Some(&e.to_string()))
                    .await?;
                return Err(e);
            }
        };
        transfers.insert(id, LiveTransfer::downloading(generation));
        drop(transfers);

        self.states.update_resume_token(id, None).await?;
        self.repository.set_task_error(id, None).await?;

        tracing::info!(download_id = %id, generation, "download resumed");
        self.emit_event(Event::Resumed { id });
        Ok(())
    }

    /// Cancel a download and discard everything recorded for it
    ///
    /// Stops the live transfer if there is one, then deletes the
    /// TransferState and the task record.
    pub async fn cancel(&self, id: DownloadId) -> Result<()> {
        let _ops = self.ops.lock().await;

        let was_active = self.transfers.lock().await.remove(&id).is_some();
        let had_state = self.states.get(id).await.is_some();
        let had_task = self.repository.task(id).await?.is_some();
        if !(was_active || had_state || had_task) {
            return Err(Error::Download(DownloadError::NotFound { id }));
        }

        // Also drops the partial file of a paused transfer
        self.engine.cancel(id).await;
        self.states.reset(id).await?;
        self.repository.delete_task(id).await?;

        tracing::info!(download_id = %id, was_active, "download canceled");
        self.emit_event(Event::Canceled { id });
        Ok(())
    }
}
