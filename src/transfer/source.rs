//! Windowed views over seekable readers.

use std::io::{self, SeekFrom};

use async_trait::async_trait;
use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::engine::BodySource;

/// Reads bytes `start..end` of an underlying reader.
///
/// The window can be moved with [`reset_window`](Self::reset_window), so one
/// reader can feed every part of a multipart upload. With hashing enabled
/// the MD5 covers the bytes read since the window was last reset or
/// rewound.
#[derive(Debug)]
pub struct WindowedSource<R> {
    inner: R,
    start: u64,
    end: u64,
    read: u64,
    seek_pending: bool,
    hasher: Option<Md5>,
}

impl<R: AsyncRead + AsyncSeek + Unpin + Send> WindowedSource<R> {
    /// Window over `start..end` of `inner`; `end` defaults to the length of
    /// the stream.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `start` lies past `end`, or any seek error.
    pub async fn new(mut inner: R, start: u64, end: Option<u64>) -> io::Result<Self> {
        let end = match end {
            Some(end) => end,
            None => {
                let here = inner.stream_position().await?;
                let len = inner.seek(SeekFrom::End(0)).await?;
                inner.seek(SeekFrom::Start(here)).await?;
                len
            }
        };
        check_bounds(start, end)?;
        Ok(Self {
            inner,
            start,
            end,
            read: 0,
            seek_pending: true,
            hasher: None,
        })
    }

    /// Hashes bytes as they are read.
    #[must_use]
    pub fn with_md5(mut self) -> Self {
        self.hasher = Some(Md5::new());
        self
    }

    /// First byte of the window.
    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// One past the last byte of the window.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Window length.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute offset of the next byte to be read.
    #[must_use]
    pub fn tell(&self) -> u64 {
        self.start + self.read
    }

    /// Moves to absolute `offset` inside the window.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `offset` is outside the window.
    pub fn seek(&mut self, offset: u64) -> io::Result<()> {
        if !(self.start..=self.end).contains(&offset) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("offset {offset} outside window {}..{}", self.start, self.end),
            ));
        }
        self.read = offset - self.start;
        self.seek_pending = true;
        Ok(())
    }

    /// Moves the window to `start..end` and restarts the hash.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `start` lies past `end`.
    pub fn reset_window(&mut self, start: u64, end: u64) -> io::Result<()> {
        check_bounds(start, end)?;
        self.start = start;
        self.end = end;
        self.restart();
        Ok(())
    }

    /// Hex MD5 of the bytes read, when hashing is enabled.
    #[must_use]
    pub fn md5_hex(&self) -> Option<String> {
        self.hasher
            .as_ref()
            .map(|hasher| hex::encode(hasher.clone().finalize()))
    }

    /// Reads the whole window once and returns its MD5, leaving the source
    /// rewound to the window start.
    ///
    /// # Errors
    ///
    /// Returns any read or seek error from the underlying reader.
    pub async fn digest(&mut self) -> io::Result<[u8; 16]> {
        self.restart();
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = BodySource::read(self, &mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        self.restart();
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&hasher.finalize());
        Ok(digest)
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn restart(&mut self) {
        self.read = 0;
        self.seek_pending = true;
        if self.hasher.is_some() {
            self.hasher = Some(Md5::new());
        }
    }
}

fn check_bounds(start: u64, end: u64) -> io::Result<()> {
    if start > end {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("window start {start} is past end {end}"),
        ));
    }
    Ok(())
}

#[async_trait]
impl<R: AsyncRead + AsyncSeek + Unpin + Send> BodySource for WindowedSource<R> {
    fn content_length(&self) -> u64 {
        self.len()
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len() - self.read;
        let want = usize::try_from(remaining).map_or(buf.len(), |left| left.min(buf.len()));
        if want == 0 {
            return Ok(0);
        }
        if self.seek_pending {
            self.inner.seek(SeekFrom::Start(self.tell())).await?;
            self.seek_pending = false;
        }
        let n = self.inner.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended at {} before window end {}", self.tell(), self.end),
            ));
        }
        if let Some(hasher) = &mut self.hasher {
            hasher.update(&buf[..n]);
        }
        self.read += n as u64;
        Ok(n)
    }

    fn rewindable(&self) -> bool {
        true
    }

    async fn rewind(&mut self) -> io::Result<()> {
        self.restart();
        Ok(())
    }
}
