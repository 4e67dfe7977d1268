//! Request engine.
//!
//! Turns a [`Request`] plus [`RequestOptions`] into a [`Response`] over
//! pooled connections. Signing, retries, redirects, structured decoding and
//! raw-body sinks are all handled here; services layer their operations on
//! top of [`RequestEngine::execute`].

mod classify;
mod driver;
mod error;
mod request;
mod response;
mod retry;
mod sink;

pub use classify::{AcceptAll, Classification, ErrorClassifier};
pub use driver::{EngineConfig, MAX_REDIRECTS, MEMORY_SINK_THRESHOLD, RequestEngine};
pub use error::{ErrorBody, PartialReception, RequestError};
pub use request::{
    Body, BodySource, ExpectedStatus, ReaderSource, Request, RequestOptions, SinkWrapper,
};
pub use response::{Response, ResponseOutcome, TransferRange, parse_content_range};
pub use retry::{DEFAULT_RETRY_BUDGET, FailureType, RetryDecision, RetryPolicy};
pub use sink::{BodySink, HashingSink, Sink};
