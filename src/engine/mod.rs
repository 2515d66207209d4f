//! Transfer engine abstraction
//!
//! The coordinator drives transfers through [`TransferEngine`] and learns
//! about their unsolicited outcomes (progress, completion, failure) from an
//! [`EngineEvent`] channel. Every transfer carries the [`DownloadId`] it was
//! started for as its tag, plus a generation number that is unique per
//! transfer, so reports from an earlier transfer of the same download can be
//! told apart from the current one.

mod http;

pub use http::{HttpTransferEngine, ResumeToken};

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::types::DownloadId;
use crate::Result;

/// Sending half of the engine event channel
pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

/// Receiving half of the engine event channel
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Create an engine event channel
pub fn event_channel() -> (EngineEventSender, EngineEventReceiver) {
    mpsc::unbounded_channel()
}

/// Outcome or progress report for a tagged transfer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// Bytes received so far
    Progress {
        /// Download the transfer belongs to
        tag: DownloadId,
        /// Transfer that produced the report
        generation: u64,
        /// Bytes received, including any resumed prefix
        received_bytes: u64,
        /// Bytes expected (0 when unknown)
        expected_bytes: u64,
    },
    /// The server answered and the body (if any) is on disk
    Finished {
        /// Download the transfer belongs to
        tag: DownloadId,
        /// Transfer that produced the report
        generation: u64,
        /// Where the received body was written
        temp_path: PathBuf,
        /// HTTP status of the response
        http_status: u16,
    },
    /// The transfer stopped on an error
    Failed {
        /// Download the transfer belongs to
        tag: DownloadId,
        /// Transfer that produced the report
        generation: u64,
        /// Human-readable description
        error: String,
        /// Data to continue the transfer later, if the engine could produce it
        resume_data: Option<Vec<u8>>,
    },
}

impl EngineEvent {
    /// Tag of the transfer this event reports on
    pub fn tag(&self) -> DownloadId {
        match self {
            EngineEvent::Progress { tag, .. }
            | EngineEvent::Finished { tag, .. }
            | EngineEvent::Failed { tag, .. } => *tag,
        }
    }

    /// Generation of the transfer this event reports on
    pub fn generation(&self) -> u64 {
        match self {
            EngineEvent::Progress { generation, .. }
            | EngineEvent::Finished { generation, .. }
            | EngineEvent::Failed { generation, .. } => *generation,
        }
    }
}

/// A transfer currently running inside the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiveTask {
    /// Download the transfer belongs to
    pub tag: DownloadId,
    /// Generation the engine assigned when the transfer started
    pub generation: u64,
    /// Bytes received so far
    pub received_bytes: u64,
    /// Bytes expected (0 when unknown)
    pub expected_bytes: u64,
}

/// Underlying network transfer machinery
///
/// Transfers stopped through [`cancel`](TransferEngine::cancel) or
/// [`cancel_with_resume_data`](TransferEngine::cancel_with_resume_data)
/// should report nothing further on the event channel. Engines that cannot
/// guarantee this still tag late reports with the stopped transfer's
/// generation.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Begin fetching `url`, tagged with `tag`; returns the new transfer's generation
    async fn start(&self, tag: DownloadId, url: Url, expected_bytes: u64) -> Result<u64>;

    /// Continue a transfer from resume data produced earlier; returns the
    /// new transfer's generation
    async fn start_from_token(&self, tag: DownloadId, token: &[u8]) -> Result<u64>;

    /// Stop the transfer and return data to continue it later
    ///
    /// `None` when no transfer is live, the server cannot resume, or the
    /// body was already complete.
    async fn cancel_with_resume_data(&self, tag: DownloadId) -> Option<Vec<u8>>;

    /// Stop the transfer and discard what it received
    async fn cancel(&self, tag: DownloadId);

    /// Transfers currently running
    async fn live_tasks(&self) -> Vec<LiveTask>;
}
