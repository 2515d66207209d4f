//! Directory stasis detection
//!
//! Imports and downloads write into a directory in bursts. Reacting to every
//! filesystem event would pick up half-written files, so the watcher waits
//! until the directory stops changing: after a change it snapshots the
//! directory (file name to size) repeatedly and declares stasis once more
//! than `stable_checks` consecutive snapshots compare equal. Any raw change
//! event resets that count.
//!
//! # Example
//!
//! ```no_run
//! use archive_delivery::config::WatchConfig;
//! use archive_delivery::stasis_watcher::DirectoryStasisWatcher;
//! use std::path::PathBuf;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (tx, mut settled) = tokio::sync::mpsc::unbounded_channel::<PathBuf>();
//! let watcher = DirectoryStasisWatcher::new("/srv/zim/inbox", WatchConfig::default(), tx)?;
//!
//! let shutdown = CancellationToken::new();
//! tokio::spawn(watcher.run(shutdown.clone()));
//!
//! while let Some(dir) = settled.recv().await {
//!     println!("{} is ready to import", dir.display());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Config as NotifyConfig, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::coordinator::DownloadCoordinator;
use crate::error::{Error, Result};
use crate::types::Event;

/// Directory contents fingerprint: file name to size in bytes
pub type DirectorySnapshot = BTreeMap<String, u64>;

/// Receives the watched directory once it has settled
pub trait StasisListener: Send + Sync + 'static {
    /// Called once per stasis
    fn directory_settled(&self, directory: &Path);
}

impl StasisListener for mpsc::UnboundedSender<PathBuf> {
    fn directory_settled(&self, directory: &Path) {
        self.send(directory.to_path_buf()).ok();
    }
}

impl StasisListener for broadcast::Sender<Event> {
    fn directory_settled(&self, directory: &Path) {
        self.send(Event::ContentReady {
            directory: directory.to_path_buf(),
        })
        .ok();
    }
}

impl StasisListener for DownloadCoordinator {
    fn directory_settled(&self, directory: &Path) {
        self.emit_event(Event::ContentReady {
            directory: directory.to_path_buf(),
        });
    }
}

/// Result of comparing a new snapshot with the previous one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckOutcome {
    /// First snapshot of a checking round; compare again right away
    Baseline,
    /// Contents differ from the previous snapshot
    Changed,
    /// Contents equal the previous snapshot this many times in a row
    Stable(u32),
    /// The directory settled; checking stopped
    Stasis,
}

/// The stasis state machine without any I/O
#[derive(Debug)]
pub struct StasisTracker {
    stable_checks: u32,
    equal_count: u32,
    previous: Option<DirectorySnapshot>,
    checking: bool,
}

impl StasisTracker {
    /// Tracker declaring stasis after more than `stable_checks` equal snapshots
    pub fn new(stable_checks: u32) -> Self {
        Self {
            stable_checks,
            equal_count: 0,
            previous: None,
            checking: false,
        }
    }

    /// Record a raw change; returns true when a checking round should begin
    pub fn notify_change(&mut self) -> bool {
        self.equal_count = 0;
        if self.checking {
            return false;
        }
        self.checking = true;
        true
    }

    /// Whether a checking round is in progress
    pub fn is_checking(&self) -> bool {
        self.checking
    }

    /// Feed the next snapshot of the directory
    pub fn observe(&mut self, snapshot: DirectorySnapshot) -> CheckOutcome {
        let Some(previous) = self.previous.replace(snapshot) else {
            return CheckOutcome::Baseline;
        };

        if self.previous.as_ref() != Some(&previous) {
            self.equal_count = 0;
            return CheckOutcome::Changed;
        }

        self.equal_count += 1;
        if self.equal_count > self.stable_checks {
            self.equal_count = 0;
            self.previous = None;
            self.checking = false;
            return CheckOutcome::Stasis;
        }
        CheckOutcome::Stable(self.equal_count)
    }
}

/// Fingerprint the files directly inside `directory`
///
/// Entries whose metadata cannot be read are skipped. An unreadable
/// directory yields an empty snapshot.
pub async fn snapshot_directory(directory: &Path) -> DirectorySnapshot {
    let mut snapshot = DirectorySnapshot::new();
    let mut entries = match tokio::fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(directory = %directory.display(), error = %e, "cannot list watched directory");
            return snapshot;
        }
    };

    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                if let Ok(meta) = entry.metadata().await {
                    snapshot.insert(entry.file_name().to_string_lossy().into_owned(), meta.len());
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(directory = %directory.display(), error = %e, "error while listing watched directory");
                break;
            }
        }
    }
    snapshot
}

/// Watches one directory and notifies a [`StasisListener`] when it settles
pub struct DirectoryStasisWatcher {
    directory: PathBuf,
    config: WatchConfig,
    /// Kept alive for as long as events should arrive
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    listener: Arc<dyn StasisListener>,
}

impl DirectoryStasisWatcher {
    /// Start watching `directory` (non-recursively), creating it if missing
    pub fn new(
        directory: impl Into<PathBuf>,
        config: WatchConfig,
        listener: impl StasisListener,
    ) -> Result<Self> {
        let directory = directory.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                if tx.send(res).is_err() {
                    tracing::debug!("stasis watcher dropped, discarding filesystem event");
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|e| Error::FolderWatch(e.to_string()))?;

        if !directory.exists() {
            std::fs::create_dir_all(&directory).map_err(|e| {
                Error::FolderWatch(format!("Failed to create watched directory: {}", e))
            })?;
            tracing::info!(directory = %directory.display(), "created watched directory");
        }

        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|e| Error::FolderWatch(format!("Failed to watch directory: {}", e)))?;

        tracing::info!(directory = %directory.display(), "watching directory for stasis");

        Ok(Self {
            directory,
            config,
            _watcher: watcher,
            rx,
            listener: Arc::new(listener),
        })
    }

    /// Directory being watched
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Process filesystem events until `shutdown` fires or the watcher fails
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut tracker = StasisTracker::new(self.config.stable_checks);
        let mut next_check: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.rx.recv() => match event {
                    Some(Ok(event)) => {
                        if is_content_change(&event.kind) && tracker.notify_change() {
                            tracing::debug!(directory = %self.directory.display(), "change detected, checking for stasis");
                            next_check = Some(Instant::now());
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(directory = %self.directory.display(), error = %e, "filesystem watcher error");
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(next_check.unwrap_or_else(Instant::now)), if next_check.is_some() => {
                    let snapshot = snapshot_directory(&self.directory).await;
                    let outcome = tracker.observe(snapshot);
                    tracing::trace!(directory = %self.directory.display(), ?outcome, "stasis check");
                    next_check = match outcome {
                        CheckOutcome::Baseline => Some(Instant::now()),
                        CheckOutcome::Changed | CheckOutcome::Stable(_) => {
                            Some(Instant::now() + self.config.check_interval)
                        }
                        CheckOutcome::Stasis => {
                            tokio::time::sleep(self.config.settle_delay).await;
                            tracing::info!(directory = %self.directory.display(), "directory reached stasis");
                            self.listener.directory_settled(&self.directory);
                            None
                        }
                    };
                }
            }
        }

        tracing::info!(directory = %self.directory.display(), "stasis watcher stopped");
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;

    fn snap(entries: &[(&str, u64)]) -> DirectorySnapshot {
        entries
            .iter()
            .map(|(name, size)| (name.to_string(), *size))
            .collect()
    }

    #[test]
    fn stasis_after_threshold_is_exceeded() {
        let mut tracker = StasisTracker::new(2);
        assert!(tracker.notify_change());

        let a = snap(&[("a.zim", 10)]);
        assert_eq!(tracker.observe(a.clone()), CheckOutcome::Baseline);
        assert_eq!(tracker.observe(a.clone()), CheckOutcome::Stable(1));
        assert_eq!(tracker.observe(a.clone()), CheckOutcome::Stable(2));
        assert_eq!(tracker.observe(a.clone()), CheckOutcome::Stasis);
        assert!(!tracker.is_checking());

        // Snapshots were cleared: a new round starts with a baseline
        assert!(tracker.notify_change());
        assert_eq!(tracker.observe(a), CheckOutcome::Baseline);
    }

    #[test]
    fn growing_file_resets_the_count() {
        let mut tracker = StasisTracker::new(2);
        tracker.notify_change();

        tracker.observe(snap(&[("a.zim", 10)]));
        assert_eq!(tracker.observe(snap(&[("a.zim", 10)])), CheckOutcome::Stable(1));
        assert_eq!(tracker.observe(snap(&[("a.zim", 20)])), CheckOutcome::Changed);
        assert_eq!(tracker.observe(snap(&[("a.zim", 20)])), CheckOutcome::Stable(1));
    }

    #[test]
    fn raw_change_resets_count_without_restarting() {
        let mut tracker = StasisTracker::new(2);
        assert!(tracker.notify_change());
        let a = snap(&[("a.zim", 10)]);
        tracker.observe(a.clone());
        tracker.observe(a.clone());
        tracker.observe(a.clone());

        assert!(!tracker.notify_change());
        assert_eq!(tracker.observe(a), CheckOutcome::Stable(1));
    }

    #[tokio::test]
    async fn snapshot_lists_names_and_sizes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.zim"), b"12345").unwrap();
        std::fs::write(dir.path().join("b.zim"), b"").unwrap();

        let snapshot = snapshot_directory(dir.path()).await;
        assert_eq!(snapshot, snap(&[("a.zim", 5), ("b.zim", 0)]));

        let missing = snapshot_directory(&dir.path().join("nope")).await;
        assert!(missing.is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn notifies_once_directory_settles() {
        let dir = tempfile::tempdir().unwrap();
        let config = WatchConfig {
            check_interval: Duration::from_millis(20),
            settle_delay: Duration::from_millis(10),
            stable_checks: 2,
        };
        let (tx, mut settled) = mpsc::unbounded_channel();
        let watcher = DirectoryStasisWatcher::new(dir.path(), config, tx).unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(watcher.run(shutdown.clone()));

        std::fs::write(dir.path().join("wikipedia.zim"), b"zim").unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), settled.recv())
            .await
            .expect("no stasis notification")
            .unwrap();
        assert_eq!(got, dir.path());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn burst_of_writes_notifies_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = WatchConfig {
            check_interval: Duration::from_millis(20),
            settle_delay: Duration::from_millis(10),
            stable_checks: 2,
        };
        let (tx, mut settled) = mpsc::unbounded_channel();
        let watcher = DirectoryStasisWatcher::new(dir.path(), config, tx).unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(watcher.run(shutdown.clone()));

        for i in 0..10 {
            std::fs::write(dir.path().join(format!("part-{i}.zim")), vec![0u8; 64 * (i + 1)]).unwrap();
        }

        let got = tokio::time::timeout(Duration::from_secs(5), settled.recv())
            .await
            .expect("no stasis notification")
            .unwrap();
        assert_eq!(got, dir.path());

        // Silence for many check intervals: no second notification
        let second = tokio::time::timeout(Duration::from_millis(400), settled.recv()).await;
        assert!(second.is_err(), "burst produced more than one notification");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn publishes_content_ready_on_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let config = WatchConfig {
            check_interval: Duration::from_millis(20),
            settle_delay: Duration::from_millis(10),
            stable_checks: 1,
        };
        let (tx, mut events) = broadcast::channel(16);
        let watcher = DirectoryStasisWatcher::new(dir.path(), config, tx).unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(watcher.run(shutdown.clone()));

        std::fs::write(dir.path().join("a.zim"), b"a").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no event")
            .unwrap();
        assert!(matches!(event, Event::ContentReady { directory } if directory == dir.path()));
        shutdown.cancel();
    }
}
