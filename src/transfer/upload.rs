//! Single-request and multipart uploads.

use std::path::Path;

use tokio::io::{AsyncRead, AsyncSeek};
use tracing::{debug, info, instrument, warn};

use super::error::TransferError;
use super::integrity::check_etag;
use super::source::WindowedSource;
use super::ResumableTransfer;
use crate::engine::Body;

/// Smallest part the service accepts, except for the last one.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Highest part number the service accepts.
pub const MAX_PARTS: u64 = 10_000;

/// Result of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// ETag of the stored object.
    pub etag: String,
    /// Bytes uploaded.
    pub size: u64,
    /// Parts sent; zero for a single-request upload.
    pub parts: u32,
}

/// Sizes of the parts `total` bytes split into with `chunk`-sized parts.
///
/// Every part is at most `chunk` bytes and the last one holds the remainder.
/// `chunk` grows when more than [`MAX_PARTS`] parts would be needed.
#[must_use]
pub fn plan_parts(total: u64, chunk: u64) -> Vec<u64> {
    let chunk = chunk.max(total.div_ceil(MAX_PARTS)).max(1);
    let mut parts = Vec::new();
    let mut offset = 0;
    while offset < total {
        let len = chunk.min(total - offset);
        parts.push(len);
        offset += len;
    }
    parts
}

impl ResumableTransfer {
    /// Uploads the file at `path` as `bucket/key`.
    ///
    /// # Errors
    ///
    /// See [`upload`](Self::upload).
    pub async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<UploadOutcome, TransferError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|error| TransferError::read_failed(path.display().to_string(), error))?;
        self.upload(bucket, key, file, 0, None).await
    }

    /// Uploads bytes `start..end` of `source` as `bucket/key`.
    ///
    /// Sources shorter than twice the chunk size go up in one request.
    /// Larger ones use a multipart upload, which is aborted if any part or
    /// the completion fails.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Source`] when the source cannot be read, a
    /// [`RequestError::Integrity`](crate::engine::RequestError::Integrity)
    /// when verification is on and an ETag disagrees with the data sent, or
    /// the first request error.
    #[instrument(skip(self, source))]
    pub async fn upload<R>(
        &self,
        bucket: &str,
        key: &str,
        source: R,
        start: u64,
        end: Option<u64>,
    ) -> Result<UploadOutcome, TransferError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let mut window = WindowedSource::new(source, start, end)
            .await
            .map_err(|error| TransferError::read_failed("upload source", error))?;
        if self.verify {
            window = window.with_md5();
        }
        let size = window.len();

        if size < 2 * self.chunk_size {
            debug!(size, "uploading in a single request");
            let content_md5 = if self.verify {
                let digest = window
                    .digest()
                    .await
                    .map_err(|error| TransferError::read_failed("upload source", error))?;
                Some(digest)
            } else {
                None
            };
            let etag = self
                .client
                .put_object(bucket, key, Body::Source(Box::new(&mut window)), content_md5)
                .await?;
            info!(size, %etag, "object uploaded");
            return Ok(UploadOutcome {
                etag,
                size,
                parts: 0,
            });
        }

        let upload_id = self.client.initiate_multipart(bucket, key).await?;
        match self
            .upload_parts(bucket, key, &upload_id, &mut window)
            .await
        {
            Ok((etag, parts)) => {
                info!(size, parts, %etag, "multipart upload finished");
                Ok(UploadOutcome { etag, size, parts })
            }
            Err(error) => {
                warn!(%upload_id, %error, "multipart upload failed, aborting");
                if let Err(abort_error) = self.client.abort_multipart(bucket, key, &upload_id).await
                {
                    warn!(%upload_id, error = %abort_error, "abort failed");
                }
                Err(error)
            }
        }
    }

    async fn upload_parts<R>(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        window: &mut WindowedSource<R>,
    ) -> Result<(String, u32), TransferError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let mut offset = window.start();
        let mut uploaded = Vec::new();
        for (number, len) in (1u32..).zip(plan_parts(window.len(), self.chunk_size)) {
            window
                .reset_window(offset, offset + len)
                .map_err(|error| TransferError::read_failed("upload source", error))?;
            let etag = self
                .client
                .upload_part(
                    bucket,
                    key,
                    upload_id,
                    number,
                    Body::Source(Box::new(&mut *window)),
                )
                .await?;
            if let Some(local) = window.md5_hex() {
                check_etag(&format!("{bucket}/{key} part {number}"), &etag, &local)?;
            }
            debug!(part = number, offset, len, "part uploaded");
            uploaded.push((number, etag));
            offset += len;
        }
        let parts = u32::try_from(uploaded.len()).unwrap_or(u32::MAX);
        let etag = self
            .client
            .complete_multipart(bucket, key, upload_id, &uploaded)
            .await?;
        Ok((etag, parts))
    }
}
