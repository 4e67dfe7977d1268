//! Completed responses.

use http::{HeaderMap, StatusCode};

use super::sink::BodySink;
use crate::decoder::StructuredValue;

/// Byte range of a raw body that was written into a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRange {
    /// First byte offset in the resource.
    pub start: u64,
    /// Last byte offset in the resource, inclusive.
    pub end: u64,
    /// Total size of the resource, when the server reported it.
    pub total: Option<u64>,
    /// Bytes actually written into the sink.
    pub downloaded: u64,
}

impl TransferRange {
    /// Range covering an entire body of `size` bytes.
    #[must_use]
    pub fn whole(size: u64) -> Self {
        Self {
            start: 0,
            end: size.saturating_sub(1),
            total: Some(size),
            downloaded: 0,
        }
    }

    /// Number of bytes the range spans.
    #[must_use]
    pub fn len(&self) -> u64 {
        if self.total == Some(0) {
            return 0;
        }
        self.end - self.start + 1
    }

    /// Whether the range spans no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every byte of the range was written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.downloaded >= self.len()
    }
}

/// Parses `bytes <start>-<end>/<total|*>`.
#[must_use]
pub fn parse_content_range(value: &str) -> Option<TransferRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = rest.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        total => Some(total.parse().ok()?),
    };
    if end < start || total.is_some_and(|total| end >= total) {
        return None;
    }
    Some(TransferRange {
        start,
        end,
        total,
        downloaded: 0,
    })
}

/// What the engine did with a response body.
#[derive(Debug)]
pub enum ResponseOutcome {
    /// Decoded markup from a status below 300.
    StructuredSuccess(StructuredValue),
    /// Decoded markup from a status of 300 or above that the caller accepted.
    StructuredError(StructuredValue),
    /// Raw bytes written into a sink.
    RawStream {
        /// The sink holding the bytes.
        sink: BodySink,
        /// Which bytes were written.
        range: TransferRange,
    },
    /// No body.
    Empty,
}

/// A response that passed status checks.
#[derive(Debug)]
pub struct Response {
    /// Status code.
    pub status: StatusCode,
    /// Reason phrase.
    pub reason: String,
    /// Response headers.
    pub headers: HeaderMap,
    /// Body outcome.
    pub outcome: ResponseOutcome,
}

impl Response {
    /// Header value as text.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Decoded markup, for structured outcomes.
    #[must_use]
    pub fn structured(&self) -> Option<&StructuredValue> {
        match &self.outcome {
            ResponseOutcome::StructuredSuccess(value) | ResponseOutcome::StructuredError(value) => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Takes the decoded markup.
    #[must_use]
    pub fn into_structured(self) -> Option<StructuredValue> {
        match self.outcome {
            ResponseOutcome::StructuredSuccess(value) | ResponseOutcome::StructuredError(value) => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Takes the sink and range of a raw outcome.
    #[must_use]
    pub fn into_stream(self) -> Option<(BodySink, TransferRange)> {
        match self.outcome {
            ResponseOutcome::RawStream { sink, range } => Some((sink, range)),
            _ => None,
        }
    }

    /// `ETag` with surrounding quotes removed.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.header("etag").map(|etag| etag.trim_matches('"'))
    }
}
