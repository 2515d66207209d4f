//! Content lookup capability
//!
//! A [`ContentStore`] resolves a [`ContentDescriptor`] to metadata plus a
//! [`ContentReader`] that serves byte ranges without materializing the whole
//! entry. Two implementations ship with the crate: [`DirectoryContentStore`]
//! maps collections onto extracted directories, [`MemoryContentStore`] holds
//! entries in memory for embedding and tests.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::ops::RangeInclusive;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{ContentError, Error};
use crate::types::ContentDescriptor;
use crate::Result;

/// Metadata of one piece of content, valid for the duration of a request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentMetadata {
    /// Total size in bytes
    pub size: u64,
    /// MIME type sent as Content-Type
    pub mime_type: String,
    /// Entity tag, already quoted
    pub etag: Option<String>,
    /// Last modification time
    pub last_modified: Option<DateTime<Utc>>,
}

/// Reads byte ranges of one looked-up entry
#[async_trait]
pub trait ContentReader: Send + Sync {
    /// Read the inclusive byte span `range`
    async fn read(&self, range: RangeInclusive<u64>) -> Result<Bytes>;
}

/// Result of a successful lookup
pub struct ContentLookup {
    /// Entry metadata
    pub metadata: ContentMetadata,
    /// Range reader for the entry body
    pub reader: Box<dyn ContentReader>,
}

impl std::fmt::Debug for ContentLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentLookup")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Resolves descriptors to content
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Look up content; `Ok(None)` when nothing exists at the descriptor
    async fn lookup(&self, descriptor: &ContentDescriptor) -> Result<Option<ContentLookup>>;
}

/// Guess a MIME type from a path's extension
pub fn mime_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "ogv" => "video/ogg",
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "pdf" => "application/pdf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// Content store backed by one directory per collection
#[derive(Default)]
pub struct DirectoryContentStore {
    collections: RwLock<HashMap<String, PathBuf>>,
}

impl DirectoryContentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `collection_id` from `root`, replacing any previous mapping
    pub fn register(&self, collection_id: impl Into<String>, root: impl Into<PathBuf>) {
        let mut collections = match self.collections.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        collections.insert(collection_id.into(), root.into());
    }

    /// Stop serving `collection_id`
    pub fn unregister(&self, collection_id: &str) {
        let mut collections = match self.collections.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        collections.remove(collection_id);
    }

    fn resolve(&self, descriptor: &ContentDescriptor) -> Option<PathBuf> {
        let collections = match self.collections.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let root = collections.get(&descriptor.collection_id)?;

        // Only plain components may appear; anything else could escape the root
        let relative = Path::new(&descriptor.path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(root.join(relative))
    }
}

#[async_trait]
impl ContentStore for DirectoryContentStore {
    async fn lookup(&self, descriptor: &ContentDescriptor) -> Result<Option<ContentLookup>> {
        let Some(path) = self.resolve(descriptor) else {
            return Ok(None);
        };

        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let last_modified = meta.modified().ok().map(DateTime::<Utc>::from);
        let etag = last_modified.map(|ts| format!("\"{:x}-{:x}\"", meta.len(), ts.timestamp()));

        Ok(Some(ContentLookup {
            metadata: ContentMetadata {
                size: meta.len(),
                mime_type: mime_for_path(&descriptor.path).to_string(),
                etag,
                last_modified,
            },
            reader: Box::new(FileReader { path }),
        }))
    }
}

struct FileReader {
    path: PathBuf,
}

#[async_trait]
impl ContentReader for FileReader {
    async fn read(&self, range: RangeInclusive<u64>) -> Result<Bytes> {
        let len = (range.end() - range.start() + 1) as usize;
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(*range.start())).await?;

        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

#[derive(Clone)]
struct MemoryEntry {
    data: Bytes,
    mime_type: String,
    etag: Option<String>,
    last_modified: Option<DateTime<Utc>>,
}

/// Content store holding entries in memory
#[derive(Default)]
pub struct MemoryContentStore {
    entries: RwLock<HashMap<ContentDescriptor, MemoryEntry>>,
}

impl MemoryContentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry; the MIME type is guessed from the path
    pub fn insert(&self, descriptor: ContentDescriptor, data: impl Into<Bytes>) {
        let mime_type = mime_for_path(&descriptor.path).to_string();
        self.insert_with(descriptor, data, mime_type, None, None);
    }

    /// Insert an entry with explicit metadata
    pub fn insert_with(
        &self,
        descriptor: ContentDescriptor,
        data: impl Into<Bytes>,
        mime_type: impl Into<String>,
        etag: Option<String>,
        last_modified: Option<DateTime<Utc>>,
    ) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(
            descriptor,
            MemoryEntry {
                data: data.into(),
                mime_type: mime_type.into(),
                etag,
                last_modified,
            },
        );
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn lookup(&self, descriptor: &ContentDescriptor) -> Result<Option<ContentLookup>> {
        let entry = {
            let entries = match self.entries.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            entries.get(descriptor).cloned()
        };

        Ok(entry.map(|entry| ContentLookup {
            metadata: ContentMetadata {
                size: entry.data.len() as u64,
                mime_type: entry.mime_type,
                etag: entry.etag,
                last_modified: entry.last_modified,
            },
            reader: Box::new(MemoryReader { data: entry.data }),
        }))
    }
}

struct MemoryReader {
    data: Bytes,
}

#[async_trait]
impl ContentReader for MemoryReader {
    async fn read(&self, range: RangeInclusive<u64>) -> Result<Bytes> {
        let start = *range.start() as usize;
        let end = *range.end() as usize;
        if end >= self.data.len() || start > end {
            return Err(Error::Content(ContentError::InvalidRange(format!(
                "{}-{} outside {} bytes",
                start,
                end,
                self.data.len()
            ))));
        }
        Ok(self.data.slice(start..=end))
    }
}
