//! Shared test helpers for creating DownloadCoordinator instances in tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::broadcast;
use url::Url;

use crate::config::Config;
use crate::coordinator::DownloadCoordinator;
use crate::db::{CatalogEntry, Database};
use crate::engine::{EngineEvent, EngineEventSender, LiveTask, TransferEngine, event_channel};
use crate::error::{DownloadError, Error, Result};
use crate::types::{DownloadId, Event};

/// Scriptable in-process engine
///
/// Resume tokens are handed out as `T1`, `T2`, ... in pause order. Reports
/// sent through the helpers carry the generation of the most recent transfer
/// of their tag.
pub(crate) struct FakeEngine {
    events: EngineEventSender,
    temp_dir: PathBuf,
    live: Mutex<HashMap<DownloadId, LiveTask>>,
    latest: Mutex<HashMap<DownloadId, u64>>,
    next_generation: AtomicU64,
    pub(crate) started: Mutex<Vec<(DownloadId, Url)>>,
    pub(crate) resumed: Mutex<Vec<(DownloadId, Vec<u8>)>>,
    pub(crate) canceled: Mutex<Vec<DownloadId>>,
    supports_resume: AtomicBool,
    echo_on_pause: AtomicBool,
    tokens_issued: AtomicU32,
}

impl FakeEngine {
    pub(crate) fn new(events: EngineEventSender, temp_dir: PathBuf) -> Self {
        Self {
            events,
            temp_dir,
            live: Mutex::new(HashMap::new()),
            latest: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            started: Mutex::new(Vec::new()),
            resumed: Mutex::new(Vec::new()),
            canceled: Mutex::new(Vec::new()),
            supports_resume: AtomicBool::new(true),
            echo_on_pause: AtomicBool::new(false),
            tokens_issued: AtomicU32::new(0),
        }
    }

    /// Server without range support: pausing yields no resume data
    pub(crate) fn without_resume(&self) {
        self.supports_resume.store(false, Ordering::SeqCst);
    }

    /// Report a cancellation failure carrying the resume data on every pause
    pub(crate) fn echo_on_pause(&self) {
        self.echo_on_pause.store(true, Ordering::SeqCst);
    }

    /// Pretend a transfer is already running (as after a relaunch)
    pub(crate) fn adopt(&self, tag: DownloadId, received: u64, expected: u64) {
        let generation = self.allocate_generation(tag);
        self.live.lock().unwrap().insert(
            tag,
            LiveTask {
                tag,
                generation,
                received_bytes: received,
                expected_bytes: expected,
            },
        );
    }

    /// Generation of the most recent transfer of `tag` (0 if none was started)
    pub(crate) fn generation(&self, tag: DownloadId) -> u64 {
        self.latest.lock().unwrap().get(&tag).copied().unwrap_or(0)
    }

    fn allocate_generation(&self, tag: DownloadId) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.latest.lock().unwrap().insert(tag, generation);
        generation
    }

    pub(crate) fn is_live(&self, tag: DownloadId) -> bool {
        self.live.lock().unwrap().contains_key(&tag)
    }

    pub(crate) fn progress(&self, tag: DownloadId, received: u64, expected: u64) {
        if let Some(task) = self.live.lock().unwrap().get_mut(&tag) {
            task.received_bytes = received;
            task.expected_bytes = expected;
        }
        self.send(EngineEvent::Progress {
            tag,
            generation: self.generation(tag),
            received_bytes: received,
            expected_bytes: expected,
        });
    }

    /// Write `body` to a temp file and report the transfer as finished
    pub(crate) fn finish(&self, tag: DownloadId, body: &[u8], http_status: u16) -> PathBuf {
        self.live.lock().unwrap().remove(&tag);
        std::fs::create_dir_all(&self.temp_dir).unwrap();
        let temp_path = self.temp_dir.join(format!("{}.part", tag));
        std::fs::write(&temp_path, body).unwrap();
        self.send(EngineEvent::Finished {
            tag,
            generation: self.generation(tag),
            temp_path: temp_path.clone(),
            http_status,
        });
        temp_path
    }

    pub(crate) fn fail(&self, tag: DownloadId, error: &str, resume_data: Option<&[u8]>) {
        self.live.lock().unwrap().remove(&tag);
        self.send(EngineEvent::Failed {
            tag,
            generation: self.generation(tag),
            error: error.to_string(),
            resume_data: resume_data.map(<[u8]>::to_vec),
        });
    }

    /// Send an arbitrary event, e.g. a late progress report
    pub(crate) fn send(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn begin(&self, tag: DownloadId, received: u64, expected: u64) -> Result<u64> {
        let mut live = self.live.lock().unwrap();
        if live.contains_key(&tag) {
            return Err(Error::Download(DownloadError::AlreadyActive { id: tag }));
        }
        let generation = self.allocate_generation(tag);
        live.insert(
            tag,
            LiveTask {
                tag,
                generation,
                received_bytes: received,
                expected_bytes: expected,
            },
        );
        Ok(generation)
    }
}

#[async_trait]
impl TransferEngine for FakeEngine {
    async fn start(&self, tag: DownloadId, url: Url, expected_bytes: u64) -> Result<u64> {
        let generation = self.begin(tag, 0, expected_bytes)?;
        self.started.lock().unwrap().push((tag, url));
        Ok(generation)
    }

    async fn start_from_token(&self, tag: DownloadId, token: &[u8]) -> Result<u64> {
        let generation = self.begin(tag, 0, 0)?;
        self.resumed.lock().unwrap().push((tag, token.to_vec()));
        Ok(generation)
    }

    async fn cancel_with_resume_data(&self, tag: DownloadId) -> Option<Vec<u8>> {
        let task = self.live.lock().unwrap().remove(&tag)?;
        if !self.supports_resume.load(Ordering::SeqCst) {
            return None;
        }
        let n = self.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
        let token = format!("T{}", n).into_bytes();
        if self.echo_on_pause.load(Ordering::SeqCst) {
            self.send(EngineEvent::Failed {
                tag,
                generation: task.generation,
                error: "cancelled".to_string(),
                resume_data: Some(token.clone()),
            });
        }
        Some(token)
    }

    async fn cancel(&self, tag: DownloadId) {
        self.live.lock().unwrap().remove(&tag);
        self.canceled.lock().unwrap().push(tag);
    }

    async fn live_tasks(&self) -> Vec<LiveTask> {
        self.live.lock().unwrap().values().copied().collect()
    }
}

/// Coordinator over a fake engine with its own database and directories.
/// The tempdir must be kept alive.
pub(crate) struct Harness {
    pub(crate) coordinator: DownloadCoordinator,
    pub(crate) engine: Arc<FakeEngine>,
    pub(crate) temp_dir: TempDir,
}

pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = root.join("test.db");
    config.download.download_dir = root.join("downloads");
    config.download.temp_dir = root.join("temp");
    config.download.progress_flush_interval = Duration::from_millis(50);
    config
}

/// Helper to create a coordinator over a fresh database
pub(crate) async fn create_test_coordinator() -> Harness {
    let temp_dir = tempfile::tempdir().unwrap();
    let (coordinator, engine) = open_coordinator(temp_dir.path(), |_| {}).await;
    Harness {
        coordinator,
        engine,
        temp_dir,
    }
}

/// Open a coordinator over the database under `root`; `prepare` runs on the
/// engine before reconciliation
pub(crate) async fn open_coordinator(
    root: &Path,
    prepare: impl FnOnce(&FakeEngine),
) -> (DownloadCoordinator, Arc<FakeEngine>) {
    let config = test_config(root);
    std::fs::create_dir_all(&config.download.download_dir).unwrap();
    std::fs::create_dir_all(&config.download.temp_dir).unwrap();

    let db = Arc::new(Database::new(&config.persistence.database_path).await.unwrap());
    let (tx, rx) = event_channel();
    let engine = Arc::new(FakeEngine::new(tx, config.download.temp_dir.clone()));
    prepare(&engine);

    let coordinator = DownloadCoordinator::with_parts(config, db.clone(), db, engine.clone(), rx)
        .await
        .unwrap();
    (coordinator, engine)
}

/// Add a catalog entry the coordinator can start
pub(crate) async fn add_catalog_entry(
    coordinator: &DownloadCoordinator,
    source_url: &str,
    size: i64,
) -> DownloadId {
    let id = DownloadId::new();
    coordinator
        .db
        .upsert_catalog_entry(&CatalogEntry {
            content_id: id,
            name: "test archive".to_string(),
            source_url: source_url.to_string(),
            size_bytes: size,
            local_path: None,
        })
        .await
        .unwrap();
    id
}

/// Wait (up to 5s) for the first event matching `predicate`
pub(crate) async fn wait_for(
    events: &mut broadcast::Receiver<Event>,
    predicate: impl Fn(&Event) -> bool,
) -> Event {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
