//! Response envelope construction
//!
//! Shapes [`ContentMetadata`] plus an optional requested range into the
//! status and header set sent back to the renderer. No I/O happens here.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};

use super::range::{RangeKind, RequestedRange, ResolvedRange, plan};
use super::store::ContentMetadata;
use crate::error::ContentError;
use crate::types::ContentDescriptor;

/// Outcome class of a content request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Whole content
    Full,
    /// Requested slice of the content
    Partial,
    /// No content at the descriptor
    NotFound,
    /// Malformed or unsatisfiable range
    InvalidRange,
}

impl ResponseStatus {
    /// HTTP status code for this outcome
    pub fn status_code(self) -> StatusCode {
        match self {
            ResponseStatus::Full => StatusCode::OK,
            ResponseStatus::Partial => StatusCode::PARTIAL_CONTENT,
            ResponseStatus::NotFound => StatusCode::NOT_FOUND,
            ResponseStatus::InvalidRange => StatusCode::BAD_REQUEST,
        }
    }
}

/// Status and headers of one response; the body is streamed separately
#[derive(Clone, Debug)]
pub struct ResponseEnvelope {
    /// Outcome
    pub status: ResponseStatus,
    /// Headers to send
    pub headers: HeaderMap,
    /// Span that the body covers, for Full and Partial responses
    pub range: Option<ResolvedRange>,
}

impl ResponseEnvelope {
    /// Envelope for a lookup miss
    pub fn not_found() -> Self {
        Self {
            status: ResponseStatus::NotFound,
            headers: HeaderMap::new(),
            range: None,
        }
    }

    /// Envelope for a rejected range
    pub fn invalid_range() -> Self {
        Self {
            status: ResponseStatus::InvalidRange,
            headers: HeaderMap::new(),
            range: None,
        }
    }

    /// Get a header value as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Format a timestamp as an RFC 1123 HTTP date
pub fn http_date(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Build the Full or Partial envelope for found content
///
/// Empty content is reported as `ContentError::NotFound` so that no malformed
/// range is ever emitted. A range that cannot be satisfied is
/// `ContentError::InvalidRange`.
pub fn build(
    descriptor: &ContentDescriptor,
    metadata: &ContentMetadata,
    requested: Option<&RequestedRange>,
) -> Result<ResponseEnvelope, ContentError> {
    let range = plan(metadata.size, requested)?
        .ok_or_else(|| ContentError::NotFound(descriptor.to_string()))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    let content_type = HeaderValue::from_str(&metadata.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.len()));

    let status = match range.kind {
        RangeKind::Full => ResponseStatus::Full,
        RangeKind::Partial => {
            let content_range = format!("bytes {}-{}/{}", range.start, range.end, metadata.size);
            insert_text(&mut headers, header::CONTENT_RANGE, &content_range);
            ResponseStatus::Partial
        }
    };

    if let Some(modified) = &metadata.last_modified {
        insert_text(&mut headers, header::LAST_MODIFIED, &http_date(modified));
    }
    if let Some(etag) = &metadata.etag {
        insert_text(&mut headers, header::ETAG, etag);
    }

    Ok(ResponseEnvelope {
        status,
        headers,
        range: Some(range),
    })
}

fn insert_text(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::debug!(header = %name, value, "dropping unrepresentable header"),
    }
}
