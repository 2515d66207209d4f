//! Byte-range planning
//!
//! Parses single-range `Range` headers and resolves them against a content
//! length into the concrete span that is served. Everything here is pure.

use std::ops::RangeInclusive;

use crate::error::ContentError;

/// Byte bounds requested by a client
///
/// `end` is `None` for open-ended requests (`bytes=500-`), meaning "to the end
/// of the content".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestedRange {
    /// First requested byte
    pub start: u64,
    /// Last requested byte (inclusive), if given
    pub end: Option<u64>,
}

impl RequestedRange {
    /// Create a range, rejecting `start > end`
    pub fn new(start: u64, end: Option<u64>) -> Result<Self, ContentError> {
        if let Some(end) = end.filter(|&end| start > end) {
            return Err(ContentError::InvalidRange(format!(
                "range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse a `Range` header value of the form `bytes=START-[END]`
    ///
    /// Multi-range requests, suffix ranges (`bytes=-500`), other units and
    /// non-numeric bounds are all rejected as `InvalidRange`.
    pub fn parse(header: &str) -> Result<Self, ContentError> {
        let invalid = || ContentError::InvalidRange(header.to_string());

        let header = header.trim();
        let (unit, spec) = header.split_once('=').ok_or_else(invalid)?;
        if !unit.trim().eq_ignore_ascii_case("bytes") {
            return Err(invalid());
        }
        if spec.contains(',') {
            return Err(invalid());
        }

        let (start, end) = spec.trim().split_once('-').ok_or_else(invalid)?;
        let start: u64 = parse_bound(start).ok_or_else(invalid)?;
        let end = match end.trim() {
            "" => None,
            end => Some(parse_bound(end).ok_or_else(invalid)?),
        };

        Self::new(start, end).map_err(|_| invalid())
    }
}

// u64::from_str accepts a leading '+', which is not valid in a byte-range-spec
fn parse_bound(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Whether a response covers the whole content or a slice of it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeKind {
    /// The whole content (200)
    Full,
    /// A slice of the content (206)
    Partial,
}

/// Concrete, clamped span actually served
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedRange {
    /// First byte served
    pub start: u64,
    /// Last byte served (inclusive)
    pub end: u64,
    /// Full or partial response
    pub kind: RangeKind,
}

impl ResolvedRange {
    /// Number of bytes in the span
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false: an empty span is never resolved
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Split the span into consecutive reads of at most `chunk_size` bytes
    pub fn chunks(&self, chunk_size: u64) -> Spans {
        ranges_for(self.len(), chunk_size, self.start)
    }
}

/// Resolve a requested range against the content length
///
/// Returns `Ok(None)` for empty content, which callers must report as not
/// found. A start beyond the last byte cannot be satisfied and is an
/// `InvalidRange`.
pub fn plan(
    content_length: u64,
    requested: Option<&RequestedRange>,
) -> Result<Option<ResolvedRange>, ContentError> {
    if content_length == 0 {
        return Ok(None);
    }
    let last = content_length - 1;

    let Some(requested) = requested else {
        return Ok(Some(ResolvedRange {
            start: 0,
            end: last,
            kind: RangeKind::Full,
        }));
    };

    if requested.start > last {
        return Err(ContentError::InvalidRange(format!(
            "range start {} is beyond content length {}",
            requested.start, content_length
        )));
    }

    let end = requested.end.map_or(last, |end| end.min(last));
    Ok(Some(ResolvedRange {
        start: requested.start,
        end,
        kind: RangeKind::Partial,
    }))
}

/// Split `content_length` bytes starting at `start` into inclusive spans of
/// at most `range_size` bytes
///
/// A zero length or zero range size yields no spans. Spans are produced
/// lazily, so arbitrarily large lengths cost nothing up front.
pub fn ranges_for(content_length: u64, range_size: u64, start: u64) -> Spans {
    Spans {
        offset: start,
        remaining: content_length,
        size: range_size,
    }
}

/// Consecutive inclusive byte spans, see [`ranges_for`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spans {
    offset: u64,
    remaining: u64,
    size: u64,
}

impl Iterator for Spans {
    type Item = RangeInclusive<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.size == 0 {
            return None;
        }
        let len = self.size.min(self.remaining);
        let span = self.offset..=self.offset.saturating_add(len - 1);
        self.remaining -= len;
        self.offset = self.offset.saturating_add(len);
        Some(span)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.size == 0 {
            return (0, Some(0));
        }
        let count = self.remaining.div_ceil(self.size);
        match usize::try_from(count) {
            Ok(count) => (count, Some(count)),
            Err(_) => (usize::MAX, None),
        }
    }
}
