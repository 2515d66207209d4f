//! Per-request state machine for content delivery
//!
//! The hosting transport signals `start`/`stop` for opaque request handles.
//! Each started handle owns one [`PendingRequest`]; the lookup runs on a
//! spawned task and its response is delivered only if the handle is still
//! pending when the lookup completes. Handles are removed when the response
//! is delivered, so every handle yields at most one response.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{Mutex, Semaphore, mpsc, oneshot};

use super::range::RequestedRange;
use super::response::{ResponseEnvelope, build};
use super::store::{ContentReader, ContentStore};
use crate::config::DeliveryConfig;
use crate::error::ContentError;
use crate::types::{ContentDescriptor, RequestHandle};
use crate::Result;

/// Lazily read response body, one chunk per store read
pub type ContentBody = BoxStream<'static, Result<Bytes>>;

/// Response delivered for one request handle
pub struct ContentResponse {
    /// Handle this response answers
    pub handle: RequestHandle,
    /// Status and headers
    pub envelope: ResponseEnvelope,
    /// Body for Full and Partial responses
    pub body: Option<ContentBody>,
}

impl ContentResponse {
    fn without_body(handle: RequestHandle, envelope: ResponseEnvelope) -> Self {
        Self {
            handle,
            envelope,
            body: None,
        }
    }

    /// Read the whole body into memory
    pub async fn into_bytes(self) -> Result<Bytes> {
        let Some(mut body) = self.body else {
            return Ok(Bytes::new());
        };
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for ContentResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentResponse")
            .field("handle", &self.handle)
            .field("envelope", &self.envelope)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Where responses are emitted
///
/// The transport picks the delivery context by choosing the sink: a oneshot
/// for a single awaiting handler, or a channel drained by a dedicated task.
pub trait ResponseSink: Send + 'static {
    /// Hand over the response; a closed receiver drops it
    fn deliver(self, response: ContentResponse);
}

impl ResponseSink for oneshot::Sender<ContentResponse> {
    fn deliver(self, response: ContentResponse) {
        let _ = self.send(response);
    }
}

impl ResponseSink for mpsc::UnboundedSender<ContentResponse> {
    fn deliver(self, response: ContentResponse) {
        let _ = self.send(response);
    }
}

/// One in-flight content request
#[derive(Clone, Debug)]
pub struct PendingRequest {
    /// Distinguishes this start from earlier starts of the same handle
    pub generation: u64,
    /// What is being looked up
    pub descriptor: ContentDescriptor,
    /// When `start` was received
    pub started_at: Instant,
}

/// Receives start/stop signals for content requests and emits responses
#[derive(Clone)]
pub struct ContentRequestDispatcher {
    store: Arc<dyn ContentStore>,
    pending: Arc<Mutex<HashMap<RequestHandle, PendingRequest>>>,
    lookups: Arc<Semaphore>,
    read_chunk_size: u64,
    next_handle: Arc<AtomicU64>,
    next_generation: Arc<AtomicU64>,
}

impl ContentRequestDispatcher {
    /// Create a dispatcher serving content from `store`
    pub fn new(store: Arc<dyn ContentStore>, config: &DeliveryConfig) -> Self {
        Self {
            store,
            pending: Arc::new(Mutex::new(HashMap::new())),
            lookups: Arc::new(Semaphore::new(config.max_concurrent_lookups.max(1))),
            read_chunk_size: config.read_chunk_size.max(1),
            next_handle: Arc::new(AtomicU64::new(1)),
            next_generation: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocate a fresh handle for transports without their own request identity
    pub fn allocate_handle(&self) -> RequestHandle {
        RequestHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Begin serving a request
    ///
    /// A second `start` for a handle that is still pending is ignored and its
    /// sink is dropped. `range_header` is the raw `Range` header value.
    pub async fn start<S: ResponseSink>(
        &self,
        handle: RequestHandle,
        descriptor: ContentDescriptor,
        range_header: Option<String>,
        sink: S,
    ) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(&handle) {
                tracing::debug!(handle = handle.get(), "duplicate start ignored");
                return;
            }
            pending.insert(
                handle,
                PendingRequest {
                    generation,
                    descriptor: descriptor.clone(),
                    started_at: Instant::now(),
                },
            );
        }

        tracing::debug!(handle = handle.get(), content = %descriptor, "content request started");

        let this = self.clone();
        tokio::spawn(async move {
            let Ok(_permit) = this.lookups.clone().acquire_owned().await else {
                this.take_current(handle, generation).await;
                return;
            };

            // Skip the lookup entirely if the caller already gave up
            if !this.is_current(handle, generation).await {
                tracing::debug!(handle = handle.get(), "request stopped before lookup");
                return;
            }

            let response = this
                .resolve(handle, &descriptor, range_header.as_deref())
                .await;
            this.finish(generation, response, sink).await;
        });
    }

    /// Stop a request; a lookup still in flight for it is discarded
    pub async fn stop(&self, handle: RequestHandle) {
        if self.pending.lock().await.remove(&handle).is_some() {
            tracing::debug!(handle = handle.get(), "content request stopped");
        }
    }

    /// Stop every pending request without emitting anything further
    pub async fn stop_all(&self) {
        let mut pending = self.pending.lock().await;
        let count = pending.len();
        pending.clear();
        if count > 0 {
            tracing::debug!(count, "all content requests stopped");
        }
    }

    /// Whether `handle` is still awaiting its response
    pub async fn is_pending(&self, handle: RequestHandle) -> bool {
        self.pending.lock().await.contains_key(&handle)
    }

    /// Number of requests awaiting a response
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Whether `handle` is still pending for the start that produced `generation`
    async fn is_current(&self, handle: RequestHandle, generation: u64) -> bool {
        self.pending
            .lock()
            .await
            .get(&handle)
            .is_some_and(|request| request.generation == generation)
    }

    /// Remove the pending entry only if it still belongs to `generation`
    async fn take_current(&self, handle: RequestHandle, generation: u64) -> Option<PendingRequest> {
        let mut pending = self.pending.lock().await;
        match pending.get(&handle) {
            Some(request) if request.generation == generation => pending.remove(&handle),
            _ => None,
        }
    }

    async fn resolve(
        &self,
        handle: RequestHandle,
        descriptor: &ContentDescriptor,
        range_header: Option<&str>,
    ) -> ContentResponse {
        let lookup = match self.store.lookup(descriptor).await {
            Ok(Some(lookup)) => lookup,
            Ok(None) => {
                return ContentResponse::without_body(handle, ResponseEnvelope::not_found());
            }
            Err(e) => {
                tracing::warn!(handle = handle.get(), content = %descriptor, error = %e, "content lookup failed");
                return ContentResponse::without_body(handle, ResponseEnvelope::not_found());
            }
        };

        let requested = match range_header.map(RequestedRange::parse).transpose() {
            Ok(requested) => requested,
            Err(e) => {
                tracing::debug!(handle = handle.get(), error = %e, "rejecting range");
                return ContentResponse::without_body(handle, ResponseEnvelope::invalid_range());
            }
        };

        match build(descriptor, &lookup.metadata, requested.as_ref()) {
            Ok(envelope) => {
                let chunks = envelope
                    .range
                    .map(|range| range.chunks(self.read_chunk_size))
                    .into_iter()
                    .flatten();
                let body = chunked_body(Arc::from(lookup.reader), chunks);
                ContentResponse {
                    handle,
                    envelope,
                    body: Some(body),
                }
            }
            Err(ContentError::InvalidRange(reason)) => {
                tracing::debug!(handle = handle.get(), reason, "unsatisfiable range");
                ContentResponse::without_body(handle, ResponseEnvelope::invalid_range())
            }
            Err(_) => ContentResponse::without_body(handle, ResponseEnvelope::not_found()),
        }
    }

    async fn finish<S: ResponseSink>(&self, generation: u64, response: ContentResponse, sink: S) {
        let handle = response.handle;
        // A stop followed by a new start leaves a newer entry under the same handle
        let Some(request) = self.take_current(handle, generation).await else {
            tracing::debug!(handle = handle.get(), "discarding response for stopped request");
            return;
        };

        tracing::debug!(
            handle = handle.get(),
            status = response.envelope.status.status_code().as_u16(),
            elapsed_ms = request.started_at.elapsed().as_millis() as u64,
            "content request resolved"
        );
        sink.deliver(response);
    }
}

fn chunked_body<I>(reader: Arc<dyn ContentReader>, chunks: I) -> ContentBody
where
    I: Iterator<Item = RangeInclusive<u64>> + Send + 'static,
{
    futures::stream::iter(chunks)
        .then(move |span| {
            let reader = reader.clone();
            async move { reader.read(span).await }
        })
        .boxed()
}
