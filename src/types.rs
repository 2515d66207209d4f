//! Core types for archive-delivery

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ContentError, Error};

/// Unique identifier for a download
///
/// Downloads are keyed by the identifier of the catalog entry they fetch, so
/// the same value tags engine transfers, TransferState rows and task records.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct DownloadId(pub Uuid);

impl DownloadId {
    /// Create a new random DownloadId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl Default for DownloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for DownloadId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for DownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DownloadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// Stored as hyphenated text so rows stay readable with the sqlite CLI
impl sqlx::Type<sqlx::Sqlite> for DownloadId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for DownloadId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode(self.0.hyphenated().to_string(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for DownloadId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let text = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(Uuid::parse_str(text)?))
    }
}

/// Opaque handle for one in-flight content request
///
/// Derived from whatever unique identity the hosting transport exposes for a
/// request (a connection-scoped counter for the bundled HTTP surface).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(pub u64);

impl RequestHandle {
    /// Get the inner value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one piece of deliverable content: a collection plus a path inside it
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct ContentDescriptor {
    /// Opaque content-collection identifier (e.g. an archive UUID)
    pub collection_id: String,
    /// Path of the entry within the collection, without a leading slash
    pub path: String,
}

impl ContentDescriptor {
    /// Create a descriptor, normalizing away any leading slashes on `path`
    pub fn new(collection_id: impl Into<String>, path: impl AsRef<str>) -> Self {
        Self {
            collection_id: collection_id.into(),
            path: path.as_ref().trim_start_matches('/').to_string(),
        }
    }

    /// Parse a descriptor from a content URL such as `kiwix://<collection>/<path>`
    ///
    /// The URL host is the collection identifier and the percent-decoded URL
    /// path is the entry path. Any other scheme, or a URL without a host, is
    /// rejected.
    pub fn from_url(url: &Url, scheme: &str) -> crate::Result<Self> {
        if !url.scheme().eq_ignore_ascii_case(scheme) {
            return Err(Error::Content(ContentError::UnsupportedUrl(url.to_string())));
        }
        let collection = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::Content(ContentError::UnsupportedUrl(url.to_string())))?;
        let path = urlencoding::decode(url.path())
            .map_err(|_| Error::Content(ContentError::UnsupportedUrl(url.to_string())))?;
        Ok(Self::new(collection, path))
    }
}

impl std::fmt::Display for ContentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection_id, self.path)
    }
}

/// Download lifecycle status as observed by the coordinator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// No transfer has been registered
    NotStarted,
    /// Engine transfer is live
    Downloading,
    /// Paused with a resume token on record
    Paused,
    /// Failed; resumable if a resume token exists
    Failed,
    /// Finished and placed at its final location
    Completed,
}

/// Event emitted during download lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Transfer registered and handed to the engine
    Started {
        /// Download ID
        id: DownloadId,
    },

    /// Byte counters changed
    Progress {
        /// Download ID
        id: DownloadId,
        /// Bytes received so far
        downloaded_bytes: u64,
        /// Bytes expected in total (0 when unknown)
        total_bytes: u64,
    },

    /// Transfer paused and a resume token was recorded
    Paused {
        /// Download ID
        id: DownloadId,
    },

    /// Transfer resumed from a stored resume token
    Resumed {
        /// Download ID
        id: DownloadId,
    },

    /// Transfer finished and the artifact was placed
    Completed {
        /// Download ID
        id: DownloadId,
        /// Final path of the fetched file
        path: PathBuf,
    },

    /// Transfer failed
    Failed {
        /// Download ID
        id: DownloadId,
        /// Human-readable error description
        error: String,
        /// Whether a resume token exists so the failure can be retried in place
        resumable: bool,
    },

    /// Transfer canceled and its records removed
    Canceled {
        /// Download ID
        id: DownloadId,
    },

    /// A watched directory reached stasis and its files are ready to import
    ContentReady {
        /// Directory that settled
        directory: PathBuf,
    },

    /// Coordinator is shutting down
    Shutdown,
}

/// Snapshot of a download as reported to observers
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadInfo {
    /// Download ID
    pub id: DownloadId,
    /// Source URL the transfer fetches
    pub source_url: String,
    /// Expected size from the catalog
    pub expected_size: u64,
    /// Bytes received so far
    pub downloaded_bytes: u64,
    /// Bytes expected in total as reported by the engine
    pub total_bytes: u64,
    /// Whether a resume token is on record
    pub has_resume_token: bool,
    /// Last recorded error, if any
    pub error: Option<String>,
    /// Derived lifecycle status
    pub status: TransferStatus,
}
