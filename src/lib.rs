//! # archive-delivery
//!
//! Backend library for offline-archive readers: serves archive entries to an
//! embedded renderer with HTTP byte-range semantics and manages resumable
//! downloads of whole archives.
//!
//! ## Design Philosophy
//!
//! archive-delivery is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Crash-tolerant** - Transfer progress and resume tokens survive restarts
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use archive_delivery::{Config, DownloadCoordinator, DownloadId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = DownloadCoordinator::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = coordinator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let id: DownloadId = "9a8f5c1e-43a0-4f4e-b0a4-2f7c1d2c6b11".parse()?;
//!     coordinator.start(id).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Download state machine over the transfer engine
pub mod coordinator;
/// Database persistence layer
pub mod db;
/// Content delivery with range semantics
pub mod delivery;
/// Transfer engine abstraction and HTTP implementation
pub mod engine;
/// Error types
pub mod error;
/// Final placement of fetched files
pub mod placement;
/// Task record persistence seam
pub mod repository;
/// Directory stasis detection
pub mod stasis_watcher;
/// Durable per-download transfer state
pub mod transfer;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::DownloadCoordinator;
pub use db::Database;
pub use delivery::{
    ContentRequestDispatcher, ContentResponse, ContentStore, DirectoryContentStore,
    MemoryContentStore, ResponseEnvelope, ResponseStatus,
};
pub use error::{
    ApiError, ContentError, DatabaseError, DownloadError, Error, ErrorDetail, Result,
    ToHttpStatus,
};
pub use stasis_watcher::{DirectoryStasisWatcher, StasisListener};
pub use transfer::{TransferState, TransferStateStore};
pub use types::{
    ContentDescriptor, DownloadId, DownloadInfo, Event, RequestHandle, TransferStatus,
};

/// Helper function to run the coordinator with graceful signal handling.
///
/// Waits for a termination signal and then calls the coordinator's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use archive_delivery::{Config, DownloadCoordinator, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let coordinator = DownloadCoordinator::new(Config::default()).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(coordinator).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(coordinator: DownloadCoordinator) -> Result<()> {
    wait_for_signal().await;
    coordinator.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
