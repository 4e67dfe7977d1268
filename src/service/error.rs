use http::StatusCode;
use thiserror::Error;

use super::ErrorCode;

/// An error reported by the service in a structured body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code} (HTTP {status}): {message}")]
pub struct ServiceError {
    /// Error code from the body.
    pub code: ErrorCode,
    /// Human-readable message from the body.
    pub message: String,
    /// Status the response carried.
    pub status: StatusCode,
    /// Request id, when the body or headers named one.
    pub request_id: Option<String>,
}

impl ServiceError {
    /// Creates a service error.
    pub fn new(code: ErrorCode, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            code,
            message: message.into(),
            status,
            request_id: None,
        }
    }

    /// Attaches a request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Whether resending may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.code.is_transient()
    }
}
