//! Pluggable inspection of decoded responses.
//!
//! After a structured body is decoded the engine asks an
//! [`ErrorClassifier`] whether the response is acceptable, transient, or a
//! service error to surface.

use http::{HeaderMap, StatusCode};

use crate::decoder::StructuredValue;
use crate::service::ServiceError;

/// Verdict on a decoded response.
#[derive(Debug)]
pub enum Classification {
    /// Hand the response on to the status check.
    Accept,
    /// Resend the request if the retry budget allows.
    Retry,
    /// Fail the call with this error.
    Fail(ServiceError),
}

/// Inspects decoded responses for service errors.
pub trait ErrorClassifier: Send + Sync {
    /// Classifies a decoded body received with `status` and `reason`.
    fn classify(
        &self,
        body: &StructuredValue,
        status: StatusCode,
        reason: &str,
        headers: &HeaderMap,
    ) -> Classification;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&StructuredValue, StatusCode, &str, &HeaderMap) -> Classification + Send + Sync,
{
    fn classify(
        &self,
        body: &StructuredValue,
        status: StatusCode,
        reason: &str,
        headers: &HeaderMap,
    ) -> Classification {
        self(body, status, reason, headers)
    }
}

/// Classifier that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ErrorClassifier for AcceptAll {
    fn classify(&self, _: &StructuredValue, _: StatusCode, _: &str, _: &HeaderMap) -> Classification {
        Classification::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_a_classifier() {
        let classifier = |_: &StructuredValue, status: StatusCode, _: &str, _: &HeaderMap| {
            if status.is_server_error() {
                Classification::Retry
            } else {
                Classification::Accept
            }
        };
        let body = StructuredValue::from("x");
        assert!(matches!(
            classifier.classify(&body, StatusCode::SERVICE_UNAVAILABLE, "", &HeaderMap::new()),
            Classification::Retry
        ));
        assert!(matches!(
            AcceptAll.classify(&body, StatusCode::SERVICE_UNAVAILABLE, "", &HeaderMap::new()),
            Classification::Accept
        ));
    }
}
