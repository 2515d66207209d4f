//! reqwest-backed transfer engine
//!
//! Each transfer streams its response body into `<temp_dir>/<tag>.part`.
//! Resume data is a JSON-encoded [`ResumeToken`]; it is only produced when
//! the server advertised byte-range support, and continuing from it sends
//! `Range: bytes=<n>-` (plus `If-Range` when an ETag is known).

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT_RANGES, ETAG, IF_RANGE, RANGE};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{EngineEvent, EngineEventSender, LiveTask, TransferEngine};
use crate::error::{DownloadError, Error};
use crate::types::DownloadId;
use crate::Result;

/// Minimum time between progress events of one transfer
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Resume data produced by [`HttpTransferEngine`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken {
    /// URL being fetched
    pub url: String,
    /// Partial file holding the received prefix
    pub temp_path: PathBuf,
    /// Length of the received prefix
    pub downloaded_bytes: u64,
    /// Bytes expected in total (0 when unknown)
    pub expected_bytes: u64,
    /// Validator sent as If-Range when continuing
    pub etag: Option<String>,
}

impl ResumeToken {
    /// Encode as opaque resume data
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode resume data
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

struct Progress {
    received: AtomicU64,
    expected: AtomicU64,
}

struct RunningTask {
    generation: u64,
    cancel: CancellationToken,
    progress: Arc<Progress>,
    join: JoinHandle<Outcome>,
}

enum Outcome {
    Finished {
        temp_path: PathBuf,
        http_status: u16,
    },
    Failed {
        error: String,
        resume: Option<ResumeToken>,
    },
    Cancelled {
        resume: Option<ResumeToken>,
    },
}

struct Request {
    tag: DownloadId,
    url: Url,
    temp_path: PathBuf,
    offset: u64,
    expected: u64,
    etag: Option<String>,
}

impl Request {
    fn token(&self, downloaded_bytes: u64, expected_bytes: u64, etag: Option<String>) -> ResumeToken {
        ResumeToken {
            url: self.url.to_string(),
            temp_path: self.temp_path.clone(),
            downloaded_bytes,
            expected_bytes,
            etag,
        }
    }
}

/// HTTP(S) transfer engine (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct HttpTransferEngine {
    client: reqwest::Client,
    temp_dir: PathBuf,
    events: EngineEventSender,
    tasks: Arc<Mutex<HashMap<DownloadId, RunningTask>>>,
    next_generation: Arc<AtomicU64>,
}

impl HttpTransferEngine {
    /// Create an engine writing partial files into `temp_dir`
    pub fn new(temp_dir: impl Into<PathBuf>, events: EngineEventSender) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("archive-delivery/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, temp_dir, events))
    }

    /// Create an engine using a preconfigured client
    pub fn with_client(
        client: reqwest::Client,
        temp_dir: impl Into<PathBuf>,
        events: EngineEventSender,
    ) -> Self {
        Self {
            client,
            temp_dir: temp_dir.into(),
            events,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
        }
    }

    fn temp_path(&self, tag: DownloadId) -> PathBuf {
        self.temp_dir.join(format!("{}.part", tag))
    }

    async fn spawn(&self, request: Request) -> Result<u64> {
        let tag = request.tag;
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&tag) {
            return Err(Error::Download(DownloadError::AlreadyActive { id: tag }));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let progress = Arc::new(Progress {
            received: AtomicU64::new(request.offset),
            expected: AtomicU64::new(request.expected),
        });

        tracing::debug!(download_id = %tag, url = %request.url, offset = request.offset, "starting transfer");

        // The map lock is held until the task is registered, so even an
        // instantly finishing transfer finds itself in the map when reporting
        let join = tokio::spawn({
            let engine = self.clone();
            let cancel = cancel.clone();
            let progress = progress.clone();
            async move {
                let outcome = engine.run(request, generation, cancel, progress).await;
                engine.report(tag, generation, outcome).await
            }
        });

        tasks.insert(
            tag,
            RunningTask {
                generation,
                cancel,
                progress,
                join,
            },
        );
        Ok(generation)
    }

    /// Remove the task from the map and emit its outcome, unless a canceller
    /// already took it over
    async fn report(&self, tag: DownloadId, generation: u64, outcome: Outcome) -> Outcome {
        let owned = {
            let mut tasks = self.tasks.lock().await;
            match tasks.get(&tag) {
                Some(task) if task.generation == generation => {
                    tasks.remove(&tag);
                    true
                }
                _ => false,
            }
        };
        if !owned {
            return outcome;
        }

        let event = match &outcome {
            Outcome::Finished {
                temp_path,
                http_status,
            } => Some(EngineEvent::Finished {
                tag,
                generation,
                temp_path: temp_path.clone(),
                http_status: *http_status,
            }),
            Outcome::Failed { error, resume } => Some(EngineEvent::Failed {
                tag,
                generation,
                error: error.clone(),
                resume_data: resume.as_ref().and_then(|token| token.to_bytes().ok()),
            }),
            Outcome::Cancelled { .. } => None,
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        outcome
    }

    async fn take(&self, tag: DownloadId) -> Option<Outcome> {
        let task = self.tasks.lock().await.remove(&tag)?;
        task.cancel.cancel();
        match task.join.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(download_id = %tag, error = %e, "transfer task ended abnormally");
                None
            }
        }
    }

    async fn run(
        &self,
        request: Request,
        generation: u64,
        cancel: CancellationToken,
        progress: Arc<Progress>,
    ) -> Outcome {
        let tag = request.tag;
        let mut builder = self.client.get(request.url.clone());
        if request.offset > 0 {
            builder = builder.header(RANGE, format!("bytes={}-", request.offset));
            if let Some(etag) = &request.etag {
                builder = builder.header(IF_RANGE, etag.as_str());
            }
        }

        let sent = tokio::select! {
            _ = cancel.cancelled() => {
                let resume = request.token(request.offset, request.expected, request.etag.clone());
                return Outcome::Cancelled { resume: Some(resume) };
            }
            sent = builder.send() => sent,
        };
        let mut response = match sent {
            Ok(response) => response,
            Err(e) => {
                let resume = (request.offset > 0)
                    .then(|| request.token(request.offset, request.expected, request.etag.clone()));
                return Outcome::Failed {
                    error: e.to_string(),
                    resume,
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(download_id = %tag, status = status.as_u16(), "transfer answered with error status");
            return Outcome::Finished {
                temp_path: request.temp_path,
                http_status: status.as_u16(),
            };
        }

        // A 200 to a ranged request means the server ignored the range
        let partial = status == StatusCode::PARTIAL_CONTENT;
        let offset = if partial { request.offset } else { 0 };
        let accepts_ranges = partial
            || response
                .headers()
                .get(ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("bytes"));
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| request.etag.clone());
        let expected = response
            .content_length()
            .map(|len| len + offset)
            .unwrap_or(request.expected);
        progress.received.store(offset, Ordering::Relaxed);
        progress.expected.store(expected, Ordering::Relaxed);

        let mut file = match open_part_file(&request.temp_path, offset).await {
            Ok(file) => file,
            Err(e) => {
                return Outcome::Failed {
                    error: format!("failed to open {}: {}", request.temp_path.display(), e),
                    resume: None,
                };
            }
        };

        let mut received = offset;
        let mut last_report = Instant::now();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = file.flush().await;
                    let resume = accepts_ranges.then(|| request.token(received, expected, etag.clone()));
                    return Outcome::Cancelled { resume };
                }
                chunk = response.chunk() => chunk,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    if let Err(e) = file.write_all(&bytes).await {
                        return Outcome::Failed {
                            error: format!("failed to write {}: {}", request.temp_path.display(), e),
                            resume: None,
                        };
                    }
                    received += bytes.len() as u64;
                    progress.received.store(received, Ordering::Relaxed);
                    if last_report.elapsed() >= PROGRESS_INTERVAL {
                        self.send_progress(tag, generation, received, expected);
                        last_report = Instant::now();
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = file.flush().await;
                    let resume = accepts_ranges.then(|| request.token(received, expected, etag.clone()));
                    return Outcome::Failed {
                        error: e.to_string(),
                        resume,
                    };
                }
            }
        }

        if let Err(e) = file.sync_all().await {
            return Outcome::Failed {
                error: format!("failed to sync {}: {}", request.temp_path.display(), e),
                resume: None,
            };
        }

        self.send_progress(tag, generation, received, expected.max(received));
        tracing::debug!(download_id = %tag, bytes = received, "transfer body complete");
        Outcome::Finished {
            temp_path: request.temp_path,
            http_status: status.as_u16(),
        }
    }

    fn send_progress(&self, tag: DownloadId, generation: u64, received_bytes: u64, expected_bytes: u64) {
        let _ = self.events.send(EngineEvent::Progress {
            tag,
            generation,
            received_bytes,
            expected_bytes,
        });
    }
}

async fn open_part_file(path: &std::path::Path, offset: u64) -> std::io::Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if offset == 0 {
        return tokio::fs::File::create(path).await;
    }
    let mut file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(offset).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    Ok(file)
}

#[async_trait]
impl TransferEngine for HttpTransferEngine {
    async fn start(&self, tag: DownloadId, url: Url, expected_bytes: u64) -> Result<u64> {
        self.spawn(Request {
            tag,
            url,
            temp_path: self.temp_path(tag),
            offset: 0,
            expected: expected_bytes,
            etag: None,
        })
        .await
    }

    async fn start_from_token(&self, tag: DownloadId, token: &[u8]) -> Result<u64> {
        let token = ResumeToken::from_bytes(token)?;
        let url = Url::parse(&token.url).map_err(|e| {
            Error::Download(DownloadError::InvalidSource {
                id: tag,
                reason: e.to_string(),
            })
        })?;

        // Never continue past what is actually on disk
        let on_disk = tokio::fs::metadata(&token.temp_path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        let offset = token.downloaded_bytes.min(on_disk);
        if offset < token.downloaded_bytes {
            tracing::warn!(
                download_id = %tag,
                recorded = token.downloaded_bytes,
                on_disk,
                "partial file shorter than resume data, continuing from disk length"
            );
        }

        self.spawn(Request {
            tag,
            url,
            temp_path: token.temp_path,
            offset,
            expected: token.expected_bytes,
            etag: token.etag,
        })
        .await
    }

    async fn cancel_with_resume_data(&self, tag: DownloadId) -> Option<Vec<u8>> {
        match self.take(tag).await? {
            Outcome::Cancelled { resume: Some(token) }
            | Outcome::Failed {
                resume: Some(token),
                ..
            } => token.to_bytes().ok(),
            Outcome::Finished { temp_path, .. } => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                None
            }
            _ => None,
        }
    }

    async fn cancel(&self, tag: DownloadId) {
        if self.take(tag).await.is_some() {
            tracing::debug!(download_id = %tag, "transfer canceled");
        }
        let _ = tokio::fs::remove_file(self.temp_path(tag)).await;
    }

    async fn live_tasks(&self) -> Vec<LiveTask> {
        self.tasks
            .lock()
            .await
            .iter()
            .map(|(tag, task)| LiveTask {
                tag: *tag,
                generation: task.generation,
                received_bytes: task.progress.received.load(Ordering::Relaxed),
                expected_bytes: task.progress.expected.load(Ordering::Relaxed),
            })
            .collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineEventReceiver, event_channel};
    use tempfile::tempdir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn next_outcome(rx: &mut EngineEventReceiver) -> EngineEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("engine event timed out")
                .expect("engine channel closed");
            if !matches!(event, EngineEvent::Progress { .. }) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn downloads_whole_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wiki.zim"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("accept-ranges", "bytes")
                    .set_body_bytes(body(1000)),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let (tx, mut rx) = event_channel();
        let engine = HttpTransferEngine::new(dir.path(), tx).unwrap();
        let id = DownloadId::new();
        let url = Url::parse(&format!("{}/wiki.zim", server.uri())).unwrap();

        let generation = engine.start(id, url, 1000).await.unwrap();

        match next_outcome(&mut rx).await {
            EngineEvent::Finished {
                tag,
                generation: reported,
                temp_path,
                http_status,
            } => {
                assert_eq!(tag, id);
                assert_eq!(reported, generation);
                assert_eq!(http_status, 200);
                assert_eq!(std::fs::read(temp_path).unwrap(), body(1000));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(engine.live_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn error_status_is_reported_as_finished() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let (tx, mut rx) = event_channel();
        let engine = HttpTransferEngine::new(dir.path(), tx).unwrap();
        let url = Url::parse(&format!("{}/missing.zim", server.uri())).unwrap();

        engine.start(DownloadId::new(), url, 0).await.unwrap();

        assert!(matches!(
            next_outcome(&mut rx).await,
            EngineEvent::Finished {
                http_status: 404,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn continues_from_resume_token_with_range_request() {
        let full = body(1000);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wiki.zim"))
            .and(header("range", "bytes=400-"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("content-range", "bytes 400-999/1000")
                    .set_body_bytes(full[400..].to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let part = dir.path().join("resumed.part");
        std::fs::write(&part, &full[..400]).unwrap();

        let (tx, mut rx) = event_channel();
        let engine = HttpTransferEngine::new(dir.path(), tx).unwrap();
        let token = ResumeToken {
            url: format!("{}/wiki.zim", server.uri()),
            temp_path: part.clone(),
            downloaded_bytes: 400,
            expected_bytes: 1000,
            etag: None,
        };

        engine
            .start_from_token(DownloadId::new(), &token.to_bytes().unwrap())
            .await
            .unwrap();

        assert!(matches!(
            next_outcome(&mut rx).await,
            EngineEvent::Finished {
                http_status: 206,
                ..
            }
        ));
        assert_eq!(std::fs::read(&part).unwrap(), full);
    }

    #[tokio::test]
    async fn restarts_when_server_ignores_range() {
        let full = body(300);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(full.clone()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let part = dir.path().join("stale.part");
        std::fs::write(&part, vec![0xFFu8; 100]).unwrap();

        let (tx, mut rx) = event_channel();
        let engine = HttpTransferEngine::new(dir.path(), tx).unwrap();
        let token = ResumeToken {
            url: format!("{}/wiki.zim", server.uri()),
            temp_path: part.clone(),
            downloaded_bytes: 100,
            expected_bytes: 300,
            etag: Some("\"v1\"".to_string()),
        };

        engine
            .start_from_token(DownloadId::new(), &token.to_bytes().unwrap())
            .await
            .unwrap();

        next_outcome(&mut rx).await;
        assert_eq!(std::fs::read(&part).unwrap(), full);
    }

    #[tokio::test]
    async fn cancel_with_resume_data_stops_live_transfer_silently() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("accept-ranges", "bytes")
                    .set_body_bytes(body(100))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let (tx, mut rx) = event_channel();
        let engine = HttpTransferEngine::new(dir.path(), tx).unwrap();
        let id = DownloadId::new();
        let url = Url::parse(&format!("{}/slow.zim", server.uri())).unwrap();

        let generation = engine.start(id, url.clone(), 100).await.unwrap();
        let live = engine.live_tasks().await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].tag, id);
        assert_eq!(live[0].generation, generation);

        let data = engine
            .cancel_with_resume_data(id)
            .await
            .expect("resume data");
        let token = ResumeToken::from_bytes(&data).unwrap();
        assert_eq!(token.url, url.to_string());
        assert_eq!(token.downloaded_bytes, 0);

        assert!(engine.live_tasks().await.is_empty());
        assert!(rx.try_recv().is_err(), "canceled transfers report nothing");

        // Nothing left to cancel
        assert!(engine.cancel_with_resume_data(id).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_start_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let (tx, _rx) = event_channel();
        let engine = HttpTransferEngine::new(dir.path(), tx).unwrap();
        let id = DownloadId::new();
        let url = Url::parse(&format!("{}/slow.zim", server.uri())).unwrap();

        let first = engine.start(id, url.clone(), 0).await.unwrap();
        let err = engine.start(id, url.clone(), 0).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Download(DownloadError::AlreadyActive { .. })
        ));

        engine.cancel(id).await;
        assert!(engine.live_tasks().await.is_empty());

        // A later transfer of the same download gets a fresh generation
        let second = engine.start(id, url, 0).await.unwrap();
        assert!(second > first);
        engine.cancel(id).await;
    }
}
