//! Error types for the request engine.
//!
//! Every failure of a logical call surfaces as one [`RequestError`]. The
//! variants keep enough of the response (status, headers, a peek of the
//! body, or the partially filled sink) for the caller to report or resume.

use std::fmt;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use thiserror::Error;

use super::response::TransferRange;
use super::sink::BodySink;
use crate::decoder::{DecodeError, StructuredValue};
use crate::http::Destination;
use crate::service::ServiceError;
use crate::signer::SignError;

/// Body carried by an unexpected-status error.
#[derive(Debug)]
pub enum ErrorBody {
    /// The body decoded as markup.
    Structured(StructuredValue),
    /// The first bytes of a raw body.
    Raw(Bytes),
    /// No body.
    Empty,
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structured(value) => match value.text_at(&["Error", "Message"]) {
                Some(message) => f.write_str(message),
                None => f.write_str("structured error body"),
            },
            Self::Raw(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Self::Empty => f.write_str("empty body"),
        }
    }
}

/// A raw body that stopped arriving part way through.
#[derive(Debug)]
pub struct PartialReception {
    /// Status code of the interrupted response.
    pub status: StatusCode,
    /// Reason phrase.
    pub reason: String,
    /// Response headers.
    pub headers: HeaderMap,
    /// The sink holding the bytes received so far.
    pub sink: BodySink,
    /// Requested range; `downloaded` counts the bytes written.
    pub range: TransferRange,
    /// The read error that cut the body short.
    pub source: io::Error,
}

/// Errors that can end a logical call.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Connecting, writing or reading failed and the retry budget is spent.
    #[error("transport error talking to {destination}: {source}")]
    Transport {
        /// Destination of the failed attempt.
        destination: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The call's overall deadline passed.
    #[error("operation timed out after {limit:?}")]
    Timeout {
        /// The configured deadline.
        limit: Duration,
    },

    /// The response could not be framed or decoded.
    #[error("invalid response from {destination} (HTTP {status}): {message}")]
    Data {
        /// Destination that sent the response.
        destination: String,
        /// Status code of the response.
        status: StatusCode,
        /// What was wrong.
        message: String,
        /// Response headers.
        headers: HeaderMap,
        /// The first bytes of the body, when read.
        peek: Bytes,
        /// The decoder error, when decoding failed.
        #[source]
        source: Option<DecodeError>,
    },

    /// The status was not one the caller expected.
    #[error("unexpected HTTP {status} {reason}: {body}")]
    Status {
        /// Status code.
        status: StatusCode,
        /// Reason phrase.
        reason: String,
        /// Response headers.
        headers: HeaderMap,
        /// The body, decoded or peeked.
        body: ErrorBody,
    },

    /// A raw body was cut short after some bytes were written.
    #[error(
        "connection lost after {} of {} body bytes: {}",
        .0.range.downloaded,
        .0.range.len(),
        .0.source
    )]
    PartialReception(Box<PartialReception>),

    /// A transferred payload did not match its checksum.
    #[error("integrity check failed for {context}: expected {expected}, got {actual}")]
    Integrity {
        /// What was checked.
        context: String,
        /// Checksum reported by the server.
        expected: String,
        /// Checksum computed locally.
        actual: String,
    },

    /// The service reported an error.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The request could not be signed.
    #[error("signing failed: {0}")]
    Sign(#[from] SignError),

    /// A local read or write failed.
    #[error("I/O error {what}: {source}")]
    Io {
        /// What was being done.
        what: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The request is malformed.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// What is wrong.
        reason: String,
    },
}

impl RequestError {
    /// Creates a transport error.
    pub fn transport(destination: &Destination, source: io::Error) -> Self {
        Self::Transport {
            destination: destination.to_string(),
            source,
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(limit: Duration) -> Self {
        Self::Timeout { limit }
    }

    /// Creates a data error without a decoder source.
    pub fn data(
        destination: &Destination,
        status: StatusCode,
        headers: HeaderMap,
        message: impl Into<String>,
        peek: Bytes,
    ) -> Self {
        Self::Data {
            destination: destination.to_string(),
            status,
            message: message.into(),
            headers,
            peek,
            source: None,
        }
    }

    /// Creates an integrity error.
    pub fn integrity(
        context: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Integrity {
            context: context.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a local I/O error.
    pub fn io(what: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            what: what.into(),
            source,
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// HTTP status associated with the error, if a response was received.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Data { status, .. } | Self::Status { status, .. } => Some(*status),
            Self::PartialReception(partial) => Some(partial.status),
            Self::Service(error) => Some(error.status),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_names_destination() {
        let destination = Destination::new("example.com", None, true);
        let error = RequestError::transport(
            &destination,
            io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
        );
        let msg = error.to_string();
        assert!(msg.contains("https://example.com"), "Expected destination in: {msg}");
        assert!(error.status().is_none());
    }

    #[test]
    fn test_status_error_shows_structured_message() {
        let mut inner = std::collections::BTreeMap::new();
        inner.insert("Message".to_string(), StructuredValue::from("Access Denied"));
        let mut root = std::collections::BTreeMap::new();
        root.insert("Error".to_string(), StructuredValue::Mapping(inner));
        let error = RequestError::Status {
            status: StatusCode::FORBIDDEN,
            reason: "Forbidden".to_string(),
            headers: HeaderMap::new(),
            body: ErrorBody::Structured(StructuredValue::Mapping(root)),
        };
        let msg = error.to_string();
        assert!(msg.contains("403"), "Expected status in: {msg}");
        assert!(msg.contains("Access Denied"), "Expected message in: {msg}");
    }

    #[test]
    fn test_partial_reception_reports_progress() {
        let error = RequestError::PartialReception(Box::new(PartialReception {
            status: StatusCode::OK,
            reason: "OK".to_string(),
            headers: HeaderMap::new(),
            sink: BodySink::memory(),
            range: TransferRange {
                downloaded: 40,
                ..TransferRange::whole(100)
            },
            source: io::Error::new(io::ErrorKind::UnexpectedEof, "closed"),
        }));
        let msg = error.to_string();
        assert!(msg.contains("40 of 100"), "Expected progress in: {msg}");
        assert_eq!(error.status(), Some(StatusCode::OK));
    }

    #[test]
    fn test_integrity_error_display() {
        let error = RequestError::integrity("part 2", "abc", "def");
        let msg = error.to_string();
        assert!(msg.contains("part 2") && msg.contains("abc") && msg.contains("def"));
    }
}
