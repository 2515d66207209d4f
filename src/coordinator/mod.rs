//! DownloadCoordinator split into focused submodules.
//!
//! The `DownloadCoordinator` struct and its methods are organized by domain:
//! - [`control`] - start/pause/resume/cancel
//! - [`completion`] - handling of unsolicited engine events
//! - [`reconcile`] - cold-start reconciliation with the engine's live tasks
//! - [`status`] - derived per-download snapshots for observers
//! - [`lifecycle`] - shutdown coordination
//!
//! Every mutation of TransferState and task records goes through one
//! operation lock, so control calls and engine outcomes never interleave.
//! Byte-counter updates skip that lock; they only touch the counters.

mod completion;
mod control;
mod lifecycle;
mod reconcile;
mod status;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::Database;
use crate::engine::{EngineEventReceiver, HttpTransferEngine, TransferEngine, event_channel};
use crate::error::{Error, Result};
use crate::repository::TaskRepository;
use crate::transfer::TransferStateStore;
use crate::types::{DownloadId, Event};

/// Coordinator-side view of a live transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    /// The engine is fetching
    Downloading,
    /// A pause has asked the engine for resume data and is waiting on it
    Pausing,
}

/// Live engine transfer of one download
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LiveTransfer {
    pub(crate) phase: Phase,
    /// Engine generation; reports tagged with any other generation are stale
    pub(crate) generation: u64,
}

impl LiveTransfer {
    pub(crate) fn downloading(generation: u64) -> Self {
        Self {
            phase: Phase::Downloading,
            generation,
        }
    }

    /// Whether a report from `generation` belongs to this transfer while it
    /// is still downloading
    pub(crate) fn accepts(&self, generation: u64) -> bool {
        self.phase == Phase::Downloading && self.generation == generation
    }
}

/// Download state machine over a [`TransferEngine`] (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct DownloadCoordinator {
    /// Database instance for runtime state and TransferState rows
    /// Public for integration tests to query persisted records
    pub db: Arc<Database>,
    /// Task and catalog records
    pub(crate) repository: Arc<dyn TaskRepository>,
    /// Network transfer machinery
    pub(crate) engine: Arc<dyn TransferEngine>,
    /// Per-download progress and resume tokens
    pub(crate) states: Arc<TransferStateStore>,
    /// Downloads with a live engine transfer
    pub(crate) transfers: Arc<Mutex<HashMap<DownloadId, LiveTransfer>>>,
    /// Serializes state-changing operations
    pub(crate) ops: Arc<Mutex<()>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Flag to indicate whether new transfers are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Stops the background tasks
    pub(crate) shutdown_token: CancellationToken,
    /// Whether the previous session ended without `shutdown()`
    pub(crate) unclean_start: bool,
}

impl DownloadCoordinator {
    /// Create a coordinator backed by SQLite and the reqwest-based engine
    ///
    /// Creates the download and temp directories, opens the database, then
    /// reconciles with the engine before returning.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        for (dir, label) in [
            (config.download_dir(), "download"),
            (config.temp_dir(), "temp"),
        ] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create {} directory '{}': {}", label, dir.display(), e),
                ))
            })?;
        }

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let (engine_tx, engine_rx) = event_channel();
        let engine = Arc::new(HttpTransferEngine::new(config.temp_dir().clone(), engine_tx)?);

        Self::with_parts(config, db.clone(), db, engine, engine_rx).await
    }

    /// Create a coordinator from explicit collaborators
    ///
    /// `engine_events` must be the receiving half of the channel `engine`
    /// reports on.
    pub async fn with_parts(
        config: Config,
        db: Arc<Database>,
        repository: Arc<dyn TaskRepository>,
        engine: Arc<dyn TransferEngine>,
        engine_events: EngineEventReceiver,
    ) -> Result<Self> {
        let unclean_start = db.was_unclean_shutdown().await?;
        if unclean_start {
            tracing::warn!("previous session did not shut down cleanly, counters will be re-synchronized");
        }

        // Mark that we're starting up (for unclean shutdown detection)
        db.set_clean_start().await?;

        let states = Arc::new(TransferStateStore::load(db.clone()).await?);

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = broadcast::channel(1000);

        let coordinator = Self {
            db,
            repository,
            engine,
            states,
            transfers: Arc::new(Mutex::new(HashMap::new())),
            ops: Arc::new(Mutex::new(())),
            event_tx,
            config: Arc::new(config),
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown_token: CancellationToken::new(),
            unclean_start,
        };

        // Events queued while reconciling are handled once the loop starts
        coordinator.restart_if_needed().await?;
        coordinator.spawn_event_loop(engine_events);
        coordinator.spawn_progress_flusher();

        Ok(coordinator)
    }

    /// Subscribe to download events
    ///
    /// Each subscriber receives all events independently. A subscriber that
    /// falls behind by more than 1000 events gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Whether the previous session ended without a clean shutdown
    pub fn was_unclean_shutdown(&self) -> bool {
        self.unclean_start
    }

    /// Emit an event to all subscribers
    ///
    /// Without subscribers the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    fn spawn_event_loop(&self, mut events: EngineEventReceiver) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = coordinator.shutdown_token.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => coordinator.handle_engine_event(event).await,
                        None => {
                            tracing::debug!("engine event channel closed");
                            break;
                        }
                    },
                }
            }
        });
    }

    fn spawn_progress_flusher(&self) {
        let states = self.states.clone();
        let token = self.shutdown_token.clone();
        let period = self.config.download.progress_flush_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = states.flush().await {
                            tracing::warn!(error = %e, "failed to flush progress counters");
                        }
                    }
                }
            }
        });
    }
}
