//! Shutdown coordination.

use std::sync::atomic::Ordering;

use crate::error::Result;
use crate::types::{DownloadId, Event};

use super::{DownloadCoordinator, Phase};

impl DownloadCoordinator {
    /// Gracefully shut down the coordinator
    ///
    /// 1. Stops accepting new transfers
    /// 2. Pauses every live transfer so its resume token is on disk
    /// 3. Stops the event loop and the progress flusher
    /// 4. Flushes batched byte counters
    /// 5. Marks a clean shutdown in the database
    ///
    /// Later steps still run when earlier ones fail; failures are logged.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);

        let active: Vec<DownloadId> = self
            .transfers
            .lock()
            .await
            .iter()
            .filter(|(_, transfer)| transfer.phase == Phase::Downloading)
            .map(|(id, _)| *id)
            .collect();
        tracing::debug!(active_count = active.len(), "pausing live transfers");
        for id in active {
            if let Err(e) = self.pause(id).await {
                tracing::warn!(download_id = %id, error = %e, "failed to pause transfer during shutdown");
            }
        }

        self.shutdown_token.cancel();

        if let Err(e) = self.states.flush().await {
            tracing::error!(error = %e, "Failed to persist progress counters during shutdown");
        }

        if let Err(e) = self.db.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
        } else {
            tracing::info!("Marked clean shutdown in database");
        }

        self.emit_event(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether new transfers are still accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }
}
