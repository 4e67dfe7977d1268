//! Request description and per-call options.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::sink::BodySink;
use crate::signer::{QueryParams, SigningScheme};

/// A streamed request body.
///
/// Sources that can [`rewind`](BodySource::rewind) make the request
/// resendable, so it can be retried or redirected.
#[async_trait]
pub trait BodySource: Send {
    /// Exact number of bytes the source will yield.
    fn content_length(&self) -> u64;

    /// Reads the next bytes into `buf`; `Ok(0)` marks the end.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Whether [`rewind`](BodySource::rewind) is supported.
    fn rewindable(&self) -> bool {
        false
    }

    /// Returns to the first byte.
    async fn rewind(&mut self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "body source cannot be rewound",
        ))
    }
}

#[async_trait]
impl<T: BodySource + ?Sized> BodySource for &mut T {
    fn content_length(&self) -> u64 {
        (**self).content_length()
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf).await
    }

    fn rewindable(&self) -> bool {
        (**self).rewindable()
    }

    async fn rewind(&mut self) -> io::Result<()> {
        (**self).rewind().await
    }
}

/// One-shot body read from any async reader.
pub struct ReaderSource<R> {
    reader: R,
    length: u64,
    read: u64,
}

impl<R: AsyncRead + Unpin + Send> ReaderSource<R> {
    /// Streams exactly `length` bytes from `reader`.
    pub fn new(reader: R, length: u64) -> Self {
        Self {
            reader,
            length,
            read: 0,
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> BodySource for ReaderSource<R> {
    fn content_length(&self) -> u64 {
        self.length
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let left = self.length - self.read;
        let want = usize::try_from(left).map_or(buf.len(), |left| left.min(buf.len()));
        if want == 0 {
            return Ok(0);
        }
        let n = self.reader.read(&mut buf[..want]).await?;
        self.read += n as u64;
        Ok(n)
    }
}

/// Request body.
#[derive(Default)]
pub enum Body<'a> {
    /// No body.
    #[default]
    Empty,
    /// In-memory bytes; always resendable.
    Bytes(Bytes),
    /// Streamed body.
    Source(Box<dyn BodySource + 'a>),
}

impl fmt::Debug for Body<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Source(source) => f
                .debug_tuple("Source")
                .field(&source.content_length())
                .finish(),
        }
    }
}

impl Body<'_> {
    /// Number of bytes the body will send.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::Source(source) => source.content_length(),
        }
    }

    /// Whether the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the body can be sent again.
    #[must_use]
    pub fn is_resendable(&self) -> bool {
        match self {
            Self::Empty | Self::Bytes(_) => true,
            Self::Source(source) => source.rewindable(),
        }
    }

    pub(crate) async fn rewind(&mut self) -> io::Result<()> {
        match self {
            Self::Empty | Self::Bytes(_) => Ok(()),
            Self::Source(source) => source.rewind().await,
        }
    }
}

impl From<Bytes> for Body<'_> {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body<'_> {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for Body<'_> {
    fn from(text: String) -> Self {
        Self::Bytes(Bytes::from(text))
    }
}

/// An outgoing request.
#[derive(Debug)]
pub struct Request<'a> {
    /// HTTP method.
    pub method: Method,
    /// Host to send to; the engine's endpoint when absent.
    pub host: Option<String>,
    /// Encoded request path.
    pub uri: String,
    /// Headers to send.
    pub headers: HeaderMap,
    /// Query parameters.
    pub query: QueryParams,
    /// Body.
    pub body: Body<'a>,
    /// Signing scheme; unsigned when absent.
    pub scheme: Option<SigningScheme>,
}

impl<'a> Request<'a> {
    /// Creates a request for `uri` with no headers, query or body.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            host: None,
            uri: uri.into(),
            headers: HeaderMap::new(),
            query: QueryParams::new(),
            body: Body::Empty,
            scheme: None,
        }
    }

    /// Sends to `host` instead of the engine's endpoint host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Adds a query parameter with a value.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), Some(value.into()));
        self
    }

    /// Adds a valueless query parameter such as `?uploads`.
    #[must_use]
    pub fn flag(mut self, key: impl Into<String>) -> Self {
        self.query.insert(key.into(), None);
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Body<'a>>) -> Self {
        self.body = body.into();
        self
    }

    /// Streams the body from `source`.
    #[must_use]
    pub fn source(mut self, source: impl BodySource + 'a) -> Self {
        self.body = Body::Source(Box::new(source));
        self
    }

    /// Signs with `scheme`.
    #[must_use]
    pub fn signed(mut self, scheme: SigningScheme) -> Self {
        self.scheme = Some(scheme);
        self
    }
}

/// Statuses that count as success for a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedStatus {
    /// Any status is handed back to the caller.
    Any,
    /// Only these statuses succeed.
    Only(Vec<StatusCode>),
}

impl Default for ExpectedStatus {
    fn default() -> Self {
        Self::Only(vec![StatusCode::OK])
    }
}

impl ExpectedStatus {
    /// Whether `status` is accepted.
    #[must_use]
    pub fn accepts(&self, status: StatusCode) -> bool {
        match self {
            Self::Any => true,
            Self::Only(codes) => codes.contains(&status),
        }
    }
}

/// Wraps an automatically chosen sink, for example to add hashing.
pub type SinkWrapper = Arc<dyn Fn(BodySink) -> BodySink + Send + Sync>;

/// Per-call options.
#[derive(Default)]
pub struct RequestOptions {
    /// Statuses that count as success.
    pub expected: ExpectedStatus,
    /// Decode the body as markup regardless of `Content-Type`.
    pub structured: bool,
    /// Destination for a raw body; chosen automatically when absent.
    pub sink: Option<BodySink>,
    /// Applied to automatically chosen sinks only.
    pub sink_wrapper: Option<SinkWrapper>,
    /// Overall deadline for the call, across all attempts.
    pub deadline: Option<Duration>,
    /// Overrides the engine's retry budget.
    pub retry_budget: Option<u32>,
    /// Sink offset to rewrite from when a ranged request is answered with
    /// the whole body.
    pub restart_at: Option<u64>,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("expected", &self.expected)
            .field("structured", &self.structured)
            .field("sink", &self.sink)
            .field("sink_wrapper", &self.sink_wrapper.is_some())
            .field("deadline", &self.deadline)
            .field("retry_budget", &self.retry_budget)
            .field("restart_at", &self.restart_at)
            .finish()
    }
}

impl RequestOptions {
    /// Accepts exactly these statuses.
    #[must_use]
    pub fn expect(mut self, statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        self.expected = ExpectedStatus::Only(statuses.into_iter().collect());
        self
    }

    /// Accepts every status.
    #[must_use]
    pub fn expect_any(mut self) -> Self {
        self.expected = ExpectedStatus::Any;
        self
    }

    /// Forces structured decoding.
    #[must_use]
    pub fn structured(mut self) -> Self {
        self.structured = true;
        self
    }

    /// Writes a raw body into `sink`.
    #[must_use]
    pub fn sink(mut self, sink: BodySink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Wraps automatically chosen sinks with `wrapper`.
    #[must_use]
    pub fn wrap_sink(mut self, wrapper: impl Fn(BodySink) -> BodySink + Send + Sync + 'static) -> Self {
        self.sink_wrapper = Some(Arc::new(wrapper));
        self
    }

    /// Limits the whole call to `deadline`.
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Overrides the retry budget.
    #[must_use]
    pub fn retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = Some(budget);
        self
    }

    /// If the server ignores the requested range and sends the whole body,
    /// a caller-supplied sink is moved back to `offset` and its hash
    /// restarted before anything is written.
    #[must_use]
    pub fn restart_at(mut self, offset: u64) -> Self {
        self.restart_at = Some(offset);
        self
    }
}
