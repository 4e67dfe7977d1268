//! The request state machine.
//!
//! One logical call runs as a sequence of attempts inside a single future:
//!
//! ```text
//! sign -> acquire -> send head -> send body -> read head -> read body
//!                                                             |
//!           redirect (new destination) <- classify <----------+
//!           retry (same destination)   <- transport failure
//! ```
//!
//! Retries and redirects both need the request body to be resendable and
//! draw from separate budgets. A raw body that fails after bytes were
//! written into the sink is never retried here: the caller gets the sink
//! back in [`RequestError::PartialReception`] and decides how to resume.

use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_RANGE, HOST, USER_AGENT};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, instrument, warn};

use super::classify::{AcceptAll, Classification, ErrorClassifier};
use super::error::{ErrorBody, PartialReception, RequestError};
use super::request::{Body, Request, RequestOptions};
use super::response::{Response, ResponseOutcome, TransferRange, parse_content_range};
use super::retry::{FailureType, RetryDecision, RetryPolicy};
use super::sink::BodySink;
use crate::decoder::{StreamingDecoder, StructuredValue};
use crate::http::constants::{
    CONNECT_TIMEOUT_SECS, ERROR_PEEK_SIZE, READ_CHUNK_SIZE, RECEIVE_TIMEOUT_SECS,
};
use crate::http::{
    ConnectionPool, Destination, Framing, ResponseBody, ResponseHead, encode_head, read_head,
};
use crate::signer::{Payload, SignableRequest, Signer, canonical_query_string};
use crate::user_agent;

/// Redirects followed per logical call.
pub const MAX_REDIRECTS: u32 = 3;

/// Raw bodies larger than this go to a temporary file when no sink is given.
pub const MEMORY_SINK_THRESHOLD: u64 = 1024 * 1024;

/// Error codes that carry a redirect `Endpoint`.
const REDIRECT_CODES: &[&str] = &["TemporaryRedirect", "PermanentRedirect", "Redirect"];

/// Transport settings for a [`RequestEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Where requests go unless they name a host.
    pub endpoint: Destination,
    /// Limit on connecting plus the TLS handshake.
    pub connect_timeout: Duration,
    /// Limit on each socket write or read.
    pub receive_timeout: Duration,
    /// Default overall deadline per call.
    pub operation_timeout: Option<Duration>,
    /// Retry budget and backoff.
    pub retry: RetryPolicy,
    /// Directory for spilled response bodies.
    pub temp_dir: Option<PathBuf>,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl EngineConfig {
    /// Defaults for `endpoint`.
    #[must_use]
    pub fn new(endpoint: Destination) -> Self {
        Self {
            endpoint,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            receive_timeout: Duration::from_secs(RECEIVE_TIMEOUT_SECS),
            operation_timeout: None,
            retry: RetryPolicy::default(),
            temp_dir: None,
            user_agent: user_agent::default_user_agent(),
        }
    }
}

/// Outcome of one attempt that did not fail.
enum Step {
    Done(Response),
    Redirect(String),
}

/// How an attempt failed.
enum AttemptError {
    /// May be resent if the budget and body allow.
    Retryable {
        kind: FailureType,
        error: RequestError,
    },
    /// Ends the call.
    Fatal(RequestError),
}

impl AttemptError {
    fn transport(destination: &Destination, source: io::Error) -> Self {
        Self::Retryable {
            kind: FailureType::Transport,
            error: RequestError::transport(destination, source),
        }
    }
}

impl From<RequestError> for AttemptError {
    fn from(error: RequestError) -> Self {
        Self::Fatal(error)
    }
}

/// Per-attempt limits.
struct AttemptContext<'a> {
    destination: &'a Destination,
    deadline: Option<(Instant, Duration)>,
    receive_timeout: Duration,
    can_retry: bool,
    can_redirect: bool,
}

impl AttemptContext<'_> {
    /// Runs `fut` within `limit`, clipped to the call deadline.
    ///
    /// Hitting the deadline ends the call; hitting `limit` is a retryable
    /// transport failure.
    async fn within<F: Future>(&self, limit: Duration, fut: F) -> Result<F::Output, AttemptError> {
        let (bound, by_deadline) = match self.deadline {
            Some((at, _)) => {
                let remaining = at.saturating_duration_since(Instant::now());
                if remaining <= limit {
                    (remaining, true)
                } else {
                    (limit, false)
                }
            }
            None => (limit, false),
        };
        match timeout(bound, fut).await {
            Ok(output) => Ok(output),
            Err(_) if by_deadline => Err(self.deadline_error()),
            Err(_) => Err(AttemptError::transport(
                self.destination,
                io::Error::new(io::ErrorKind::TimedOut, format!("no progress within {limit:?}")),
            )),
        }
    }

    async fn receive<F: Future>(&self, fut: F) -> Result<F::Output, AttemptError> {
        self.within(self.receive_timeout, fut).await
    }

    fn deadline_error(&self) -> AttemptError {
        let limit = self.deadline.map_or(Duration::ZERO, |(_, limit)| limit);
        AttemptError::Fatal(RequestError::timeout(limit))
    }
}

/// Sends requests over pooled connections with signing, retries,
/// redirects and response decoding.
pub struct RequestEngine {
    config: EngineConfig,
    pool: Arc<ConnectionPool>,
    signer: Option<Signer>,
    classifier: Arc<dyn ErrorClassifier>,
}

impl std::fmt::Debug for RequestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEngine")
            .field("config", &self.config)
            .field("signer", &self.signer)
            .field("idle_connections", &self.pool.idle_count())
            .finish_non_exhaustive()
    }
}

impl RequestEngine {
    /// Creates an engine with its own pool, no signer, and a classifier
    /// that accepts every response.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            pool: Arc::new(ConnectionPool::new()),
            signer: None,
            classifier: Arc::new(AcceptAll),
        }
    }

    /// Signs requests that name a scheme with `signer`.
    #[must_use]
    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Inspects decoded responses with `classifier`.
    #[must_use]
    pub fn with_classifier(mut self, classifier: impl ErrorClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Shares `pool` with other engines.
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<ConnectionPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Transport settings.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The connection pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// The signer, if any.
    #[must_use]
    pub fn signer(&self) -> Option<&Signer> {
        self.signer.as_ref()
    }

    /// Runs one logical call to completion.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] when the call fails after any retries and
    /// redirects it was allowed.
    #[instrument(skip_all, fields(method = %request.method, uri = %request.uri))]
    pub async fn execute(
        &self,
        mut request: Request<'_>,
        mut options: RequestOptions,
    ) -> Result<Response, RequestError> {
        let deadline = options
            .deadline
            .or(self.config.operation_timeout)
            .map(|limit| (Instant::now() + limit, limit));
        let retry = match options.retry_budget {
            Some(budget) => self.config.retry.with_budget(budget),
            None => self.config.retry.clone(),
        };
        let mut destination = match request.host.as_deref() {
            Some(host) => self.config.endpoint.with_authority(host).map_err(|error| {
                RequestError::invalid_request(format!("bad request host: {error}"))
            })?,
            None => self.config.endpoint.clone(),
        };

        let mut retries = 0u32;
        let mut redirects = 0u32;
        loop {
            let resendable = request.body.is_resendable();
            let ctx = AttemptContext {
                destination: &destination,
                deadline,
                receive_timeout: self.config.receive_timeout,
                can_retry: resendable && retries < retry.budget(),
                can_redirect: resendable && redirects < MAX_REDIRECTS,
            };
            let (kind, error) = match self.attempt(&mut request, &mut options, &ctx).await {
                Ok(Step::Done(response)) => {
                    debug!(status = %response.status, retries, redirects, "call complete");
                    return Ok(response);
                }
                Ok(Step::Redirect(endpoint)) => {
                    redirects += 1;
                    let next = destination.with_authority(&endpoint).map_err(|error| {
                        RequestError::invalid_request(format!("bad redirect endpoint: {error}"))
                    })?;
                    info!(from = %destination, to = %next, redirects, "following redirect");
                    destination = next;
                    rewind(&mut request.body).await?;
                    continue;
                }
                Err(AttemptError::Fatal(error)) => return Err(error),
                Err(AttemptError::Retryable { kind, error }) => (kind, error),
            };

            if !resendable {
                debug!(%error, "body cannot be resent");
                return Err(error);
            }
            match retry.should_retry(kind, retries) {
                RetryDecision::Retry { delay, attempt } => {
                    warn!(%error, attempt, delay_ms = delay.as_millis(), "resending");
                    if let Some((at, limit)) = deadline
                        && Instant::now() + delay >= at
                    {
                        return Err(RequestError::timeout(limit));
                    }
                    sleep(delay).await;
                    retries += 1;
                    rewind(&mut request.body).await?;
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(%error, %reason, "giving up");
                    return Err(error);
                }
            }
        }
    }

    async fn attempt(
        &self,
        request: &mut Request<'_>,
        options: &mut RequestOptions,
        ctx: &AttemptContext<'_>,
    ) -> Result<Step, AttemptError> {
        let (headers, target) = self.prepare(request, ctx.destination)?;

        let mut connection = ctx
            .within(
                self.config.connect_timeout,
                self.pool.acquire(ctx.destination, self.config.connect_timeout),
            )
            .await?
            .map_err(|error| AttemptError::transport(ctx.destination, error))?;

        let head = encode_head(&request.method, &target, &headers);
        ctx.receive(connection.write_all(&head))
            .await?
            .map_err(|error| AttemptError::transport(ctx.destination, error))?;
        match &mut request.body {
            Body::Empty => {}
            Body::Bytes(bytes) => {
                ctx.receive(connection.write_all(bytes))
                    .await?
                    .map_err(|error| AttemptError::transport(ctx.destination, error))?;
            }
            Body::Source(source) => {
                let expected = source.content_length();
                let mut sent = 0u64;
                let mut buf = vec![0u8; READ_CHUNK_SIZE];
                while sent < expected {
                    let n = source
                        .read(&mut buf)
                        .await
                        .map_err(|error| RequestError::io("reading request body", error))?;
                    if n == 0 {
                        return Err(AttemptError::Fatal(RequestError::invalid_request(format!(
                            "request body ended after {sent} of {expected} bytes"
                        ))));
                    }
                    ctx.receive(connection.write_all(&buf[..n]))
                        .await?
                        .map_err(|error| AttemptError::transport(ctx.destination, error))?;
                    sent += n as u64;
                }
            }
        }
        ctx.receive(connection.flush())
            .await?
            .map_err(|error| AttemptError::transport(ctx.destination, error))?;

        let head = ctx
            .receive(read_head(connection.io()))
            .await?
            .map_err(|error| AttemptError::transport(ctx.destination, error))?;
        debug!(status = %head.status, "response head received");

        let framing = head.framing(&request.method);
        let body = ResponseBody::new(connection, framing, !head.wants_close());
        let structured = options.structured
            || matches!(
                head.content_type().as_deref(),
                Some("application/xml" | "text/xml")
            );
        if structured && framing != Framing::Empty {
            self.read_structured(head, body, framing, options, ctx).await
        } else {
            self.read_raw(head, body, framing, options, ctx).await
        }
    }

    /// Adds transport headers, signs, and builds the request target.
    fn prepare(
        &self,
        request: &Request<'_>,
        destination: &Destination,
    ) -> Result<(HeaderMap, String), AttemptError> {
        let mut headers = request.headers.clone();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        if let Ok(agent) = HeaderValue::from_str(&self.config.user_agent) {
            headers.insert(USER_AGENT, agent);
        }
        if !request.body.is_empty() || matches!(request.method, Method::PUT | Method::POST) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(request.body.len()));
        }
        let authority = destination.authority();

        let (headers, query) = match &request.scheme {
            Some(scheme) => {
                let signer = self.signer.as_ref().ok_or_else(|| {
                    RequestError::invalid_request(format!(
                        "{} signing requested but no credentials are configured",
                        scheme.name()
                    ))
                })?;
                let payload = match &request.body {
                    Body::Empty => Payload::Bytes(&[]),
                    Body::Bytes(bytes) => Payload::Bytes(bytes),
                    Body::Source(_) => Payload::Unsigned,
                };
                let signed = signer
                    .sign(
                        scheme,
                        Utc::now(),
                        SignableRequest {
                            method: &request.method,
                            host: &authority,
                            uri: &request.uri,
                            headers,
                            query: request.query.clone(),
                            payload,
                        },
                    )
                    .map_err(RequestError::from)?;
                (signed.headers, signed.query)
            }
            None => {
                let host = HeaderValue::from_str(&authority).map_err(|_| {
                    RequestError::invalid_request(format!("invalid host {authority:?}"))
                })?;
                headers.insert(HOST, host);
                (headers, request.query.clone())
            }
        };

        let mut target = request.uri.clone();
        if !query.is_empty() {
            target.push('?');
            target.push_str(&canonical_query_string(&query, None));
        }
        Ok((headers, target))
    }

    async fn read_structured(
        &self,
        head: ResponseHead,
        mut body: ResponseBody,
        framing: Framing,
        options: &RequestOptions,
        ctx: &AttemptContext<'_>,
    ) -> Result<Step, AttemptError> {
        if framing == Framing::UntilClose {
            let peek = ctx
                .receive(body.peek(ERROR_PEEK_SIZE))
                .await?
                .unwrap_or_default();
            return Err(AttemptError::Fatal(RequestError::data(
                ctx.destination,
                head.status,
                head.headers,
                "structured body has neither Content-Length nor chunked framing",
                Bytes::from(peek),
            )));
        }

        let mut decoder = StreamingDecoder::new();
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let n = ctx
                .receive(body.read(&mut buf))
                .await?
                .map_err(|error| AttemptError::transport(ctx.destination, error))?;
            if n == 0 {
                break;
            }
            decoder
                .feed(&buf[..n])
                .map_err(|error| decode_failure(ctx.destination, &head, error))?;
        }
        let value = decoder
            .finish()
            .map_err(|error| decode_failure(ctx.destination, &head, error))?;
        if let Some(connection) = body.into_connection() {
            self.pool.release(connection);
        }

        let ResponseHead {
            status,
            reason,
            headers,
            ..
        } = head;

        if let Some(value) = &value {
            if status.is_redirection()
                && ctx.can_redirect
                && let Some(endpoint) = redirect_endpoint(value)
            {
                return Ok(Step::Redirect(endpoint.to_string()));
            }
            match self.classifier.classify(value, status, &reason, &headers) {
                Classification::Accept => {}
                Classification::Retry if ctx.can_retry => {
                    return Err(AttemptError::Retryable {
                        kind: FailureType::Classified,
                        error: RequestError::Status {
                            status,
                            reason,
                            headers,
                            body: ErrorBody::Structured(value.clone()),
                        },
                    });
                }
                Classification::Retry => debug!("transient error but no retry budget left"),
                Classification::Fail(error) => {
                    return Err(AttemptError::Fatal(RequestError::Service(error)));
                }
            }
        }

        if !options.expected.accepts(status) {
            return Err(AttemptError::Fatal(RequestError::Status {
                status,
                reason,
                headers,
                body: value.map_or(ErrorBody::Empty, ErrorBody::Structured),
            }));
        }

        let outcome = match value {
            None => ResponseOutcome::Empty,
            Some(value) if status.as_u16() < 300 => ResponseOutcome::StructuredSuccess(value),
            Some(value) => ResponseOutcome::StructuredError(value),
        };
        Ok(Step::Done(Response {
            status,
            reason,
            headers,
            outcome,
        }))
    }

    async fn read_raw(
        &self,
        head: ResponseHead,
        mut body: ResponseBody,
        framing: Framing,
        options: &mut RequestOptions,
        ctx: &AttemptContext<'_>,
    ) -> Result<Step, AttemptError> {
        let ResponseHead {
            status,
            reason,
            headers,
            ..
        } = head;

        if !options.expected.accepts(status) {
            let peek = ctx
                .receive(body.peek(ERROR_PEEK_SIZE))
                .await?
                .unwrap_or_default();
            if let Some(connection) = body.into_connection() {
                self.pool.release(connection);
            }
            let body = if peek.is_empty() {
                ErrorBody::Empty
            } else {
                ErrorBody::Raw(Bytes::from(peek))
            };
            return Err(AttemptError::Fatal(RequestError::Status {
                status,
                reason,
                headers,
                body,
            }));
        }

        let (size, head_bytes) = match framing {
            Framing::Empty => {
                if let Some(connection) = body.into_connection() {
                    self.pool.release(connection);
                }
                return Ok(Step::Done(Response {
                    status,
                    reason,
                    headers,
                    outcome: ResponseOutcome::Empty,
                }));
            }
            Framing::Chunked | Framing::UntilClose => {
                let peek = ctx
                    .receive(body.peek(ERROR_PEEK_SIZE))
                    .await?
                    .map_err(|error| AttemptError::transport(ctx.destination, error))?;
                if peek.is_empty() && body.is_complete() {
                    if let Some(connection) = body.into_connection() {
                        self.pool.release(connection);
                    }
                    return Ok(Step::Done(Response {
                        status,
                        reason,
                        headers,
                        outcome: ResponseOutcome::Empty,
                    }));
                }
                (None, peek)
            }
            Framing::Length(size) => (Some(size), Vec::new()),
        };

        let mut range = if status == StatusCode::PARTIAL_CONTENT {
            let parsed = headers
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range);
            match parsed {
                Some(range) if size.is_none_or(|size| range.len() == size) => range,
                _ => {
                    return Err(AttemptError::Fatal(RequestError::data(
                        ctx.destination,
                        status,
                        headers,
                        "partial content without a matching Content-Range",
                        Bytes::new(),
                    )));
                }
            }
        } else {
            TransferRange::whole(size.unwrap_or(0))
        };
        let unframed_whole = size.is_none() && status != StatusCode::PARTIAL_CONTENT;
        if unframed_whole {
            range.total = None;
        }

        let caller_sink = options.sink.is_some();
        let mut sink = match options.sink.take() {
            Some(sink) => sink,
            None => self.auto_sink(size, options)?,
        };
        // Once the sink has been moved back, its old contents are gone and the
        // failure has to reach the caller even with nothing written.
        let whole_body = caller_sink && status != StatusCode::PARTIAL_CONTENT;
        let repositioned = match options.restart_at.filter(|_| whole_body) {
            Some(offset) => {
                debug!(offset, "range ignored by server, rewriting sink from offset");
                sink.seek(SeekFrom::Start(offset))
                    .await
                    .map_err(|error| RequestError::io("repositioning response sink", error))?;
                sink.restart_hash();
                true
            }
            None => false,
        };

        // Bytes already read while probing an unframed body for emptiness.
        if !head_bytes.is_empty() {
            sink.write_all(&head_bytes)
                .await
                .map_err(|error| RequestError::io("writing response body", error))?;
        }
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let mut received = head_bytes.len() as u64;
        while size.is_none_or(|size| received < size) {
            let want = size
                .and_then(|size| usize::try_from(size - received).ok())
                .map_or(buf.len(), |left| left.min(buf.len()));
            let read = match ctx.receive(body.read(&mut buf[..want])).await {
                Ok(read) => read,
                Err(AttemptError::Retryable { error, .. }) => match error {
                    RequestError::Transport { source, .. } => Err(source),
                    other => Err(io::Error::other(other.to_string())),
                },
                Err(fatal) => return Err(fatal),
            };
            let n = match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(error) if received == 0 && !repositioned => {
                    if caller_sink {
                        options.sink = Some(sink);
                    }
                    return Err(AttemptError::transport(ctx.destination, error));
                }
                Err(error) => {
                    warn!(received, ?size, %error, "body interrupted");
                    range.downloaded = received;
                    return Err(AttemptError::Fatal(RequestError::PartialReception(
                        Box::new(PartialReception {
                            status,
                            reason,
                            headers,
                            sink,
                            range,
                            source: error,
                        }),
                    )));
                }
            };
            sink.write_all(&buf[..n])
                .await
                .map_err(|error| RequestError::io("writing response body", error))?;
            received += n as u64;
            if size.is_none() && !caller_sink && received > MEMORY_SINK_THRESHOLD {
                sink.spill(self.config.temp_dir.as_deref())
                    .await
                    .map_err(|error| RequestError::io("moving body to a temporary file", error))?;
            }
        }
        sink.flush()
            .await
            .map_err(|error| RequestError::io("flushing response body", error))?;
        if let Some(connection) = body.into_connection() {
            self.pool.release(connection);
        }

        if unframed_whole {
            range = TransferRange::whole(received);
        }
        range.downloaded = received;
        Ok(Step::Done(Response {
            status,
            reason,
            headers,
            outcome: ResponseOutcome::RawStream { sink, range },
        }))
    }

    /// Picks a sink for a body of `size` bytes. Bodies of unknown size start
    /// in memory and move to a temporary file once they outgrow it.
    fn auto_sink(
        &self,
        size: Option<u64>,
        options: &RequestOptions,
    ) -> Result<BodySink, RequestError> {
        let sink = if size.is_some_and(|size| size > MEMORY_SINK_THRESHOLD) {
            BodySink::temp_file(self.config.temp_dir.as_deref())
                .map_err(|error| RequestError::io("creating temporary file", error))?
        } else {
            BodySink::memory()
        };
        Ok(match &options.sink_wrapper {
            Some(wrap) => wrap(sink),
            None => sink,
        })
    }
}

async fn rewind(body: &mut Body<'_>) -> Result<(), RequestError> {
    body.rewind()
        .await
        .map_err(|error| RequestError::io("rewinding request body", error))
}

fn redirect_endpoint(value: &StructuredValue) -> Option<&str> {
    let code = value.text_at(&["Error", "Code"])?;
    if !REDIRECT_CODES.contains(&code) {
        return None;
    }
    value
        .text_at(&["Error", "Endpoint"])
        .map(str::trim)
        .filter(|endpoint| !endpoint.is_empty())
}

fn decode_failure(
    destination: &Destination,
    head: &ResponseHead,
    error: crate::decoder::DecodeError,
) -> AttemptError {
    AttemptError::Fatal(RequestError::Data {
        destination: destination.to_string(),
        status: head.status,
        message: "malformed structured body".to_string(),
        headers: head.headers.clone(),
        peek: Bytes::new(),
        source: Some(error),
    })
}
