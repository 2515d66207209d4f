//! TransferState: per-download progress and resume token
//!
//! [`TransferStateStore`] keeps the live records in memory behind a
//! read/write lock and mirrors them into the `transfer_states` table.
//! Byte-counter updates stay in memory until the next [`flush`]; anything
//! that sets or clears a resume token is written through before returning.
//!
//! [`flush`]: TransferStateStore::flush

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::db::{Database, TransferStateRow};
use crate::types::DownloadId;
use crate::Result;

/// Progress record of one download
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferState {
    /// Bytes received so far
    pub downloaded_bytes: u64,
    /// Bytes expected in total (0 when unknown)
    pub total_bytes: u64,
    /// Opaque engine blob to continue the transfer
    #[serde(skip)]
    pub resume_token: Option<Vec<u8>>,
}

impl TransferState {
    /// Whether the counters satisfy `total == 0 || downloaded <= total`
    pub fn is_consistent(&self) -> bool {
        counters_consistent(self.downloaded_bytes, self.total_bytes)
    }

    fn to_row(&self, id: DownloadId) -> TransferStateRow {
        TransferStateRow {
            download_id: id,
            downloaded_bytes: self.downloaded_bytes as i64,
            total_bytes: self.total_bytes as i64,
            resume_token: self.resume_token.clone(),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

impl From<TransferStateRow> for TransferState {
    fn from(row: TransferStateRow) -> Self {
        Self {
            downloaded_bytes: row.downloaded_bytes.max(0) as u64,
            total_bytes: row.total_bytes.max(0) as u64,
            resume_token: row.resume_token,
        }
    }
}

fn counters_consistent(downloaded: u64, total: u64) -> bool {
    total == 0 || downloaded <= total
}

#[derive(Clone, Debug)]
struct Entry {
    state: TransferState,
    dirty: bool,
}

/// In-memory TransferState map backed by the database
pub struct TransferStateStore {
    db: Arc<Database>,
    entries: RwLock<HashMap<DownloadId, Entry>>,
}

impl TransferStateStore {
    /// Load every persisted record; the database is authoritative on cold start
    pub async fn load(db: Arc<Database>) -> Result<Self> {
        let rows = db.list_transfer_states().await?;
        let entries = rows
            .into_iter()
            .map(|row| {
                let id = row.download_id;
                (
                    id,
                    Entry {
                        state: TransferState::from(row),
                        dirty: false,
                    },
                )
            })
            .collect::<HashMap<_, _>>();

        tracing::debug!(count = entries.len(), "loaded transfer states");

        Ok(Self {
            db,
            entries: RwLock::new(entries),
        })
    }

    /// Record byte counters, creating the record if needed
    ///
    /// The resume token is never touched. Updates that would violate
    /// `downloaded <= total` are logged and dropped. Returns whether the
    /// update was applied.
    pub async fn update_progress(&self, id: DownloadId, downloaded: u64, total: u64) -> bool {
        if !counters_consistent(downloaded, total) {
            tracing::warn!(
                download_id = %id,
                downloaded,
                total,
                "ignoring inconsistent progress update"
            );
            return false;
        }

        let mut entries = self.entries.write().await;
        let entry = entries.entry(id).or_insert_with(|| Entry {
            state: TransferState::default(),
            dirty: true,
        });
        entry.state.downloaded_bytes = downloaded;
        entry.state.total_bytes = total;
        entry.dirty = true;
        true
    }

    /// Set (or with `None`, clear) the resume token and persist immediately
    ///
    /// Byte counters are left as they are; a missing record is created with
    /// zeroed counters. When the write fails the in-memory record is left as
    /// it was before the call.
    pub async fn update_resume_token(&self, id: DownloadId, token: Option<Vec<u8>>) -> Result<()> {
        let mut entries = self.entries.write().await;
        let created = !entries.contains_key(&id);
        let entry = entries.entry(id).or_insert_with(|| Entry {
            state: TransferState::default(),
            dirty: true,
        });
        let previous = std::mem::replace(&mut entry.state.resume_token, token);

        // Lock stays held so a concurrent flush cannot write an older snapshot after us
        match self.db.upsert_transfer_state(&entry.state.to_row(id)).await {
            Ok(()) => {
                entry.dirty = false;
                Ok(())
            }
            Err(e) => {
                tracing::error!(download_id = %id, error = %e, "failed to persist resume token");
                if created {
                    entries.remove(&id);
                } else {
                    entry.state.resume_token = previous;
                }
                Err(e)
            }
        }
    }

    /// Remove the record from memory and storage
    pub async fn reset(&self, id: DownloadId) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(&id);
        self.db.delete_transfer_state(id).await
    }

    /// Stored resume token, if any
    pub async fn resume_token_for(&self, id: DownloadId) -> Option<Vec<u8>> {
        self.entries
            .read()
            .await
            .get(&id)
            .and_then(|entry| entry.state.resume_token.clone())
    }

    /// Current record for a download
    pub async fn get(&self, id: DownloadId) -> Option<TransferState> {
        self.entries
            .read()
            .await
            .get(&id)
            .map(|entry| entry.state.clone())
    }

    /// All records
    pub async fn snapshot(&self) -> Vec<(DownloadId, TransferState)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.state.clone()))
            .collect()
    }

    /// Write every record with unflushed counter changes; returns how many
    pub async fn flush(&self) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let mut flushed = 0;
        for (id, entry) in entries.iter_mut().filter(|(_, entry)| entry.dirty) {
            self.db.upsert_transfer_state(&entry.state.to_row(*id)).await?;
            entry.dirty = false;
            flushed += 1;
        }
        if flushed > 0 {
            tracing::debug!(flushed, "flushed transfer states");
        }
        Ok(flushed)
    }
}
