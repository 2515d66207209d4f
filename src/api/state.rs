//! Application state for the API server

use crate::delivery::ContentRequestDispatcher;
use crate::{Config, DownloadCoordinator};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request (cheap Arc clones).
#[derive(Clone)]
pub struct AppState {
    /// Download state machine
    pub coordinator: Arc<DownloadCoordinator>,

    /// Content request dispatcher the content route drives
    pub dispatcher: ContentRequestDispatcher,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(
        coordinator: Arc<DownloadCoordinator>,
        dispatcher: ContentRequestDispatcher,
        config: Arc<Config>,
    ) -> Self {
        Self {
            coordinator,
            dispatcher,
            config,
        }
    }
}
