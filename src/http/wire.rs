//! HTTP/1.1 message framing.
//!
//! Writes request heads and parses response heads, then reads bodies framed
//! by `Content-Length`, chunked transfer-coding, or connection close.

use std::io;

use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::Connection;
use super::constants::{MAX_HEADERS, MAX_LINE_BYTES};

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// Status code.
    pub status: StatusCode,
    /// Reason phrase as sent.
    pub reason: String,
    /// Response headers.
    pub headers: HeaderMap,
    http10: bool,
}

impl ResponseHead {
    /// Declared `Content-Length`, if present and numeric.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }

    /// Whether the body uses chunked transfer-coding.
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.to_ascii_lowercase().contains("chunked"))
    }

    /// Media type without parameters, lowercased.
    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
    }

    /// Whether the server will close the connection after this response.
    #[must_use]
    pub fn wants_close(&self) -> bool {
        let connection = self
            .headers
            .get(CONNECTION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);
        match connection.as_deref() {
            Some(value) if value.contains("close") => true,
            Some(value) if value.contains("keep-alive") => false,
            _ => self.http10,
        }
    }

    /// Body framing for a response to `method`.
    #[must_use]
    pub fn framing(&self, method: &Method) -> Framing {
        if *method == Method::HEAD
            || self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
        {
            return Framing::Empty;
        }
        if self.is_chunked() {
            return Framing::Chunked;
        }
        match self.content_length() {
            Some(length) => Framing::Length(length),
            None => Framing::UntilClose,
        }
    }
}

/// How the end of a response body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body.
    Empty,
    /// Exactly this many bytes.
    Length(u64),
    /// Chunked transfer-coding.
    Chunked,
    /// Everything until the server closes the connection.
    UntilClose,
}

/// Serializes a request head.
pub(crate) fn encode_head(method: &Method, target: &str, headers: &HeaderMap) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

async fn read_line<R: AsyncBufRead + Unpin>(io: &mut R) -> io::Result<Option<String>> {
    let mut line = Vec::new();
    let limit = u64::try_from(MAX_LINE_BYTES).unwrap_or(u64::MAX);
    let read = (&mut *io).take(limit).read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        if read >= MAX_LINE_BYTES {
            return Err(invalid("response line too long"));
        }
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-line",
        ));
    }
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    String::from_utf8(line)
        .map(Some)
        .map_err(|_| invalid("response line is not UTF-8"))
}

async fn read_headers<R: AsyncBufRead + Unpin>(io: &mut R) -> io::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    loop {
        let line = read_line(io).await?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed in headers")
        })?;
        if line.is_empty() {
            return Ok(headers);
        }
        if headers.len() >= MAX_HEADERS {
            return Err(invalid("too many response headers"));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| invalid(format!("malformed header line {line:?}")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| invalid(format!("invalid header name {name:?}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| invalid(format!("invalid value for header {name}")))?;
        headers.append(name, value);
    }
}

/// Reads a response head, skipping interim `1xx` responses.
pub(crate) async fn read_head<R: AsyncBufRead + Unpin>(io: &mut R) -> io::Result<ResponseHead> {
    loop {
        let line = read_line(io).await?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response",
            )
        })?;
        let mut parts = line.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        let http10 = match version {
            "HTTP/1.1" => false,
            "HTTP/1.0" => true,
            _ => return Err(invalid(format!("unsupported status line {line:?}"))),
        };
        let status = parts
            .next()
            .and_then(|code| StatusCode::from_bytes(code.as_bytes()).ok())
            .ok_or_else(|| invalid(format!("invalid status in {line:?}")))?;
        let reason = parts.next().unwrap_or("").trim().to_string();
        let headers = read_headers(io).await?;

        if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
            continue;
        }
        return Ok(ResponseHead {
            status,
            reason,
            headers,
            http10,
        });
    }
}

#[derive(Debug, Clone, Copy)]
enum BodyState {
    Length { remaining: u64 },
    Chunked { remaining: u64, finished: bool },
    UntilClose { finished: bool },
    Done,
}

/// A response body being read off its connection.
///
/// Owns the connection until the body is consumed; the connection can then
/// be taken back with [`ResponseBody::into_connection`].
#[derive(Debug)]
pub struct ResponseBody {
    connection: Connection,
    state: BodyState,
    reusable: bool,
}

impl ResponseBody {
    /// Starts reading a body with `framing` from `connection`.
    pub(crate) fn new(connection: Connection, framing: Framing, keep_alive: bool) -> Self {
        let state = match framing {
            Framing::Empty | Framing::Length(0) => BodyState::Done,
            Framing::Length(remaining) => BodyState::Length { remaining },
            Framing::Chunked => BodyState::Chunked {
                remaining: 0,
                finished: false,
            },
            Framing::UntilClose => BodyState::UntilClose { finished: false },
        };
        let reusable = keep_alive && framing != Framing::UntilClose;
        Self {
            connection,
            state,
            reusable,
        }
    }

    /// Whether every byte of the body has been read.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(
            self.state,
            BodyState::Done
                | BodyState::UntilClose { finished: true }
                | BodyState::Chunked { finished: true, .. }
        )
    }

    /// Reads the next piece of the body; `Ok(0)` marks its end.
    ///
    /// A connection that closes before the declared length is reached
    /// yields `UnexpectedEof`.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.read_inner(buf).await;
        if result.is_err() {
            self.connection.mark_broken();
        }
        result
    }

    async fn read_inner(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.state {
            BodyState::Done
            | BodyState::UntilClose { finished: true }
            | BodyState::Chunked { finished: true, .. } => Ok(0),
            BodyState::Length { remaining } => {
                let want = clamp(remaining, buf.len());
                let n = self.connection.io().read(&mut buf[..want]).await?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("connection closed with {remaining} body bytes outstanding"),
                    ));
                }
                let remaining = remaining - n as u64;
                self.state = if remaining == 0 {
                    BodyState::Done
                } else {
                    BodyState::Length { remaining }
                };
                Ok(n)
            }
            BodyState::UntilClose { .. } => {
                let n = self.connection.io().read(buf).await?;
                if n == 0 {
                    self.state = BodyState::UntilClose { finished: true };
                }
                Ok(n)
            }
            BodyState::Chunked { mut remaining, .. } => {
                if remaining == 0 {
                    remaining = self.next_chunk_size().await?;
                    if remaining == 0 {
                        self.skip_trailers().await?;
                        self.state = BodyState::Chunked {
                            remaining: 0,
                            finished: true,
                        };
                        return Ok(0);
                    }
                }
                let want = clamp(remaining, buf.len());
                let n = self.connection.io().read(&mut buf[..want]).await?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed inside a chunk",
                    ));
                }
                remaining -= n as u64;
                if remaining == 0 {
                    let terminator = read_line(self.connection.io()).await?;
                    if terminator.as_deref() != Some("") {
                        return Err(invalid("chunk not terminated by CRLF"));
                    }
                }
                self.state = BodyState::Chunked {
                    remaining,
                    finished: false,
                };
                Ok(n)
            }
        }
    }

    async fn next_chunk_size(&mut self) -> io::Result<u64> {
        let line = read_line(self.connection.io()).await?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed before chunk")
        })?;
        let size = line.split(';').next().unwrap_or("").trim();
        u64::from_str_radix(size, 16).map_err(|_| invalid(format!("invalid chunk size {size:?}")))
    }

    async fn skip_trailers(&mut self) -> io::Result<()> {
        loop {
            match read_line(self.connection.io()).await? {
                Some(line) if line.is_empty() => return Ok(()),
                Some(_) => {}
                None => return Ok(()),
            }
        }
    }

    /// Reads and discards up to `limit` bytes, returning what was read.
    pub(crate) async fn peek(&mut self, limit: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(limit.min(4096));
        let mut buf = vec![0u8; limit.min(4096).max(1)];
        while out.len() < limit {
            let want = (limit - out.len()).min(buf.len());
            let n = self.read(&mut buf[..want]).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    /// Gives the connection back if it can carry another request.
    pub(crate) fn into_connection(mut self) -> Option<Connection> {
        if !(self.reusable && self.is_complete()) {
            return None;
        }
        self.connection.finish_response();
        Some(self.connection)
    }
}

fn clamp(remaining: u64, len: usize) -> usize {
    usize::try_from(remaining).map_or(len, |r| r.min(len))
}
