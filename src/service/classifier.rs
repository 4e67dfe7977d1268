//! Default classifier for AWS-style error bodies.

use http::{HeaderMap, StatusCode};
use tracing::debug;

use super::{ErrorCode, ServiceError};
use crate::decoder::StructuredValue;
use crate::engine::{Classification, ErrorClassifier};

/// Paths at which services place the `Error` element.
const ERROR_PATHS: &[&[&str]] = &[
    &["Error"],
    &["ErrorResponse", "Error"],
    &["Response", "Errors", "Error"],
];

/// Request-id headers, in order of preference.
const REQUEST_ID_HEADERS: &[&str] = &["x-amz-request-id", "x-amzn-requestid"];

/// Retries transient codes and turns other error bodies into [`ServiceError`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AwsErrorClassifier;

impl AwsErrorClassifier {
    /// Extracts the service error a body describes, if any.
    #[must_use]
    pub fn extract(
        body: &StructuredValue,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Option<ServiceError> {
        let error = ERROR_PATHS.iter().find_map(|path| body.path(path))?;
        // Several errors may be listed; the first one is reported.
        let error = error.items().into_iter().next()?;
        let code = ErrorCode::parse(error.text_at(&["Code"])?);
        let message = error.text_at(&["Message"]).unwrap_or_default();
        let root = body.root_name();
        let request_id = ["RequestId", "RequestID"]
            .into_iter()
            .find_map(|key| {
                error
                    .text_at(&[key])
                    .or_else(|| root.and_then(|root| body.text_at(&[root, key])))
            })
            .map(str::to_string)
            .or_else(|| {
                REQUEST_ID_HEADERS
                    .iter()
                    .find_map(|name| headers.get(*name)?.to_str().ok())
                    .map(str::to_string)
            });
        Some(ServiceError::new(code, message, status).with_request_id(request_id))
    }
}

impl ErrorClassifier for AwsErrorClassifier {
    fn classify(
        &self,
        body: &StructuredValue,
        status: StatusCode,
        _reason: &str,
        headers: &HeaderMap,
    ) -> Classification {
        let Some(error) = Self::extract(body, status, headers) else {
            return Classification::Accept;
        };
        if error.is_transient() {
            debug!(code = %error.code, %status, "transient service error");
            return Classification::Retry;
        }
        if status.as_u16() >= 400 {
            return Classification::Fail(error);
        }
        Classification::Accept
    }
}
