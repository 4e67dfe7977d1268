//! Destinations for raw response bodies.
//!
//! The engine writes raw bodies into a [`BodySink`]: an in-memory buffer, a
//! temporary file, a hashing wrapper around another sink, or any
//! caller-supplied type implementing [`Sink`]. Sinks are seekable so a
//! resumed download can rewind to its starting offset.

use std::fmt;
use std::io::{self, Cursor, SeekFrom};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use md5::{Digest, Md5};
use tokio::io::{AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

/// Any writable, seekable destination.
pub trait Sink: AsyncWrite + AsyncSeek + Unpin + Send + Sync {}

impl<T: AsyncWrite + AsyncSeek + Unpin + Send + Sync> Sink for T {}

/// Where a raw response body is written.
pub enum BodySink {
    /// Growable in-memory buffer.
    Memory(Cursor<Vec<u8>>),
    /// Anonymous temporary file, removed when dropped.
    TempFile(tokio::fs::File),
    /// MD5-hashing wrapper around another sink.
    Hashing(Box<HashingSink>),
    /// Caller-supplied sink.
    Custom(Box<dyn Sink>),
}

impl fmt::Debug for BodySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory(buf) => f
                .debug_tuple("Memory")
                .field(&buf.get_ref().len())
                .finish(),
            Self::TempFile(_) => f.write_str("TempFile"),
            Self::Hashing(inner) => f.debug_tuple("Hashing").field(&inner.inner).finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl BodySink {
    /// Empty in-memory sink.
    #[must_use]
    pub fn memory() -> Self {
        Self::Memory(Cursor::new(Vec::new()))
    }

    /// Anonymous temporary file in `dir`, or the system temp directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn temp_file(dir: Option<&Path>) -> io::Result<Self> {
        Ok(Self::TempFile(anonymous_file(dir)?))
    }

    /// Moves the contents of an in-memory sink into a temporary file in
    /// `dir`, keeping the write offset. Other sinks are left as they are.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created or written.
    pub async fn spill(&mut self, dir: Option<&Path>) -> io::Result<()> {
        match self {
            Self::Memory(buf) => {
                let mut file = anonymous_file(dir)?;
                file.write_all(buf.get_ref()).await?;
                file.seek(SeekFrom::Start(buf.position())).await?;
                *self = Self::TempFile(file);
                Ok(())
            }
            Self::Hashing(sink) => Box::pin(sink.inner.spill(dir)).await,
            Self::TempFile(_) | Self::Custom(_) => Ok(()),
        }
    }

    /// Wraps a caller-supplied sink.
    pub fn custom(sink: impl Sink + 'static) -> Self {
        Self::Custom(Box::new(sink))
    }

    /// Wraps `inner` so every written byte is hashed with MD5.
    #[must_use]
    pub fn hashing(inner: BodySink) -> Self {
        Self::Hashing(Box::new(HashingSink::new(inner)))
    }

    /// Hex MD5 of the bytes written so far, for hashing sinks.
    #[must_use]
    pub fn md5_hex(&self) -> Option<String> {
        match self {
            Self::Hashing(sink) => Some(sink.hex_digest()),
            _ => None,
        }
    }

    /// Number of bytes hashed so far, for hashing sinks.
    #[must_use]
    pub fn hashed_len(&self) -> Option<u64> {
        match self {
            Self::Hashing(sink) => Some(sink.hashed),
            _ => None,
        }
    }

    /// Discards the running hash of a hashing sink.
    pub fn restart_hash(&mut self) {
        if let Self::Hashing(sink) = self {
            sink.restart();
        }
    }

    /// Current write offset.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the underlying sink cannot report its position.
    pub async fn position(&mut self) -> io::Result<u64> {
        self.stream_position().await
    }

    /// Reads back everything written to a memory or temp-file sink.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for caller-supplied sinks, or an I/O error from
    /// the temporary file.
    pub async fn read_all(&mut self) -> io::Result<Vec<u8>> {
        match self {
            Self::Memory(buf) => Ok(buf.get_ref().clone()),
            Self::TempFile(file) => {
                let end = file.stream_position().await?;
                file.seek(SeekFrom::Start(0)).await?;
                let mut out = Vec::new();
                file.read_to_end(&mut out).await?;
                file.seek(SeekFrom::Start(end)).await?;
                Ok(out)
            }
            Self::Hashing(sink) => Box::pin(sink.inner.read_all()).await,
            Self::Custom(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "caller-supplied sinks cannot be read back",
            )),
        }
    }

    /// Consumes a memory sink and returns its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Self::Memory(buf) => Some(buf.into_inner()),
            Self::Hashing(sink) => sink.inner.into_bytes(),
            _ => None,
        }
    }
}

fn anonymous_file(dir: Option<&Path>) -> io::Result<tokio::fs::File> {
    let file = match dir {
        Some(dir) => tempfile::tempfile_in(dir)?,
        None => tempfile::tempfile()?,
    };
    Ok(tokio::fs::File::from_std(file))
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $call:expr) => {
        match $self.get_mut() {
            BodySink::Memory($inner) => $call,
            BodySink::TempFile($inner) => $call,
            BodySink::Hashing($inner) => $call,
            BodySink::Custom($inner) => $call,
        }
    };
}

impl AsyncWrite for BodySink {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        dispatch!(self, inner => Pin::new(inner).poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        dispatch!(self, inner => Pin::new(inner).poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        dispatch!(self, inner => Pin::new(inner).poll_shutdown(cx))
    }
}

impl AsyncSeek for BodySink {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        dispatch!(self, inner => Pin::new(inner).start_seek(position))
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        dispatch!(self, inner => Pin::new(inner).poll_complete(cx))
    }
}

/// Hashes bytes as they are written through to an inner sink.
pub struct HashingSink {
    inner: BodySink,
    hasher: Md5,
    hashed: u64,
}

impl HashingSink {
    /// Wraps `inner` with a fresh hash.
    #[must_use]
    pub fn new(inner: BodySink) -> Self {
        Self {
            inner,
            hasher: Md5::new(),
            hashed: 0,
        }
    }

    /// Hex digest of the bytes hashed so far.
    #[must_use]
    pub fn hex_digest(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    /// Starts the hash over.
    pub fn restart(&mut self) {
        self.hasher = Md5::new();
        self.hashed = 0;
    }

    /// Returns the wrapped sink.
    #[must_use]
    pub fn into_inner(self) -> BodySink {
        self.inner
    }
}

impl AsyncWrite for HashingSink {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                this.hasher.update(&buf[..written]);
                this.hashed += written as u64;
                Poll::Ready(Ok(written))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl AsyncSeek for HashingSink {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.get_mut().inner).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.get_mut().inner).poll_complete(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_collects_writes() {
        let mut sink = BodySink::memory();
        sink.write_all(b"hello ").await.unwrap();
        sink.write_all(b"world").await.unwrap();
        assert_eq!(sink.position().await.unwrap(), 11);
        assert_eq!(sink.into_bytes().unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_temp_file_sink_reads_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut sink = BodySink::temp_file(Some(dir.path())).unwrap();
        sink.write_all(b"spilled to disk").await.unwrap();
        sink.flush().await.unwrap();
        assert_eq!(sink.read_all().await.unwrap(), b"spilled to disk");
        assert_eq!(sink.position().await.unwrap(), 15);
    }

    #[tokio::test]
    async fn test_spill_moves_memory_into_file_and_keeps_hash() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut sink = BodySink::hashing(BodySink::memory());
        sink.write_all(b"hel").await.unwrap();
        sink.spill(Some(dir.path())).await.unwrap();
        sink.write_all(b"lo").await.unwrap();
        sink.flush().await.unwrap();

        assert!(matches!(&sink, BodySink::Hashing(inner) if matches!(inner.inner, BodySink::TempFile(_))));
        assert_eq!(sink.position().await.unwrap(), 5);
        assert_eq!(sink.read_all().await.unwrap(), b"hello");
        assert_eq!(
            sink.md5_hex().unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[tokio::test]
    async fn test_hashing_sink_hashes_and_passes_through() {
        let mut sink = BodySink::hashing(BodySink::memory());
        sink.write_all(b"hello").await.unwrap();
        assert_eq!(
            sink.md5_hex().unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
        assert_eq!(sink.hashed_len(), Some(5));
        assert_eq!(sink.into_bytes().unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_restart_hash_after_rewind() {
        let mut sink = BodySink::hashing(BodySink::memory());
        sink.write_all(b"garbage").await.unwrap();
        sink.seek(SeekFrom::Start(0)).await.unwrap();
        sink.restart_hash();
        sink.write_all(b"hello").await.unwrap();
        assert_eq!(
            sink.md5_hex().unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[tokio::test]
    async fn test_custom_sink_cannot_be_read_back() {
        let mut sink = BodySink::custom(Cursor::new(Vec::<u8>::new()));
        sink.write_all(b"x").await.unwrap();
        let error = sink.read_all().await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::Unsupported);
        assert!(sink.md5_hex().is_none());
    }
}
