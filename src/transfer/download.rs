//! Resumable ranged downloads.

use http::StatusCode;
use tracing::{debug, info, instrument, warn};

use super::ResumableTransfer;
use super::error::TransferError;
use super::integrity::{check_etag, is_multipart_etag};
use crate::engine::{BodySink, RequestError, RequestOptions, TransferRange};
use crate::s3::ByteRange;

/// How many times a resumed download may be answered from the beginning.
pub const MAX_RESTARTS: u32 = 3;

/// Result of a download.
#[derive(Debug)]
pub struct DownloadOutcome {
    /// The sink holding the object bytes.
    pub sink: BodySink,
    /// Range written, relative to the object; `downloaded` counts every
    /// byte written across resumes.
    pub range: TransferRange,
    /// ETag of the object.
    pub etag: Option<String>,
    /// Number of times reception was resumed.
    pub resumes: u32,
    /// Whether the bytes were checked against the ETag.
    pub verified: bool,
}

impl ResumableTransfer {
    /// Downloads `bucket/key`, or `range` of it, resuming after partial
    /// receptions.
    ///
    /// Each interruption re-requests the object from the first byte not yet
    /// written. With verification on, a whole-object download whose ETag is
    /// a plain MD5 is hashed and compared; ranged downloads are never
    /// verified.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Integrity`] on a checksum mismatch,
    /// [`TransferError::Incomplete`] when the server keeps restarting the
    /// object, or the first non-resumable request error.
    #[instrument(skip(self, sink))]
    pub async fn download(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
        sink: Option<BodySink>,
    ) -> Result<DownloadOutcome, TransferError> {
        let object = format!("{bucket}/{key}");
        let verify = self.verify && range.is_none();
        let origin = range.map_or(0, |range| range.start);
        let last = range.and_then(|range| range.end);

        let mut sink = match sink {
            Some(mut sink) => {
                let base = sink
                    .position()
                    .await
                    .map_err(|error| TransferError::write_failed(&object, error))?;
                let sink = if verify { BodySink::hashing(sink) } else { sink };
                Some((sink, base))
            }
            None => None,
        };

        let mut start = origin;
        let mut resumes = 0;
        let mut restarts = 0;
        let mut downloaded = 0u64;
        loop {
            let resuming = downloaded > 0;
            let request_range =
                (resuming || range.is_some()).then_some(ByteRange { start, end: last });
            let base = sink.as_ref().map_or(0, |(_, base)| *base);
            let mut options = RequestOptions::default();
            match sink.take() {
                Some((current, base)) => {
                    options = options.sink(current);
                    if resuming {
                        options = options.restart_at(base);
                    }
                }
                None if verify => options = options.wrap_sink(BodySink::hashing),
                None => {}
            }

            let error = match self
                .client
                .get_object(bucket, key, request_range, options)
                .await
            {
                Ok(response) => {
                    let whole = response.status == StatusCode::OK;
                    let etag = response.etag().map(str::to_string);
                    let Some((body, served)) = response.into_stream() else {
                        let body = if verify {
                            BodySink::hashing(BodySink::memory())
                        } else {
                            BodySink::memory()
                        };
                        let range = TransferRange::whole(0);
                        return finish(&object, body, range, etag, resumes, verify);
                    };
                    if resuming && whole {
                        warn!(%object, "resume answered with the whole object");
                        downloaded = 0;
                    }
                    downloaded += served.downloaded;
                    let range = TransferRange {
                        start: if whole { served.start } else { origin },
                        end: served.end,
                        total: served.total,
                        downloaded,
                    };
                    return finish(&object, body, range, etag, resumes, verify);
                }
                Err(error) => error,
            };

            let RequestError::PartialReception(partial) = error else {
                return Err(error.into());
            };
            let partial = *partial;
            let received = partial.range.downloaded;
            if partial.status == StatusCode::OK {
                if resuming {
                    restarts += 1;
                    if restarts > MAX_RESTARTS {
                        return Err(TransferError::Incomplete { object, restarts });
                    }
                }
                downloaded = received;
            } else {
                downloaded += received;
            }
            start = partial.range.start + received;
            resumes += 1;
            warn!(
                %object,
                received,
                next = start,
                error = %partial.source,
                "reception interrupted, resuming"
            );
            sink = Some((partial.sink, base));
        }
    }
}

fn finish(
    object: &str,
    sink: BodySink,
    range: TransferRange,
    etag: Option<String>,
    resumes: u32,
    verify: bool,
) -> Result<DownloadOutcome, TransferError> {
    let mut verified = false;
    if verify {
        match (&etag, sink.md5_hex()) {
            (Some(etag), Some(local)) if !is_multipart_etag(etag) => {
                check_etag(object, etag, &local)?;
                verified = true;
            }
            _ => debug!(object, "object cannot be verified"),
        }
    }
    info!(object, bytes = range.downloaded, resumes, verified, "download finished");
    Ok(DownloadOutcome {
        sink,
        range,
        etag,
        resumes,
        verified,
    })
}
