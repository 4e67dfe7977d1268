//! Resumable uploads and downloads on top of [`S3Client`].
//!
//! Uploads below twice the chunk size go up in one request; larger ones are
//! split into parts of at most the chunk size and completed as a multipart
//! upload. A failed multipart upload is always aborted before the error is
//! returned.
//!
//! Downloads resume from the first byte not yet written whenever the engine
//! reports a [`PartialReception`](crate::engine::PartialReception).
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use awsutils::engine::{EngineConfig, RequestEngine};
//! use awsutils::http::Destination;
//! use awsutils::s3::S3Client;
//! use awsutils::signer::{Credentials, Signer};
//! use awsutils::transfer::ResumableTransfer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = Destination::new("s3.amazonaws.com", None, true);
//! let engine = RequestEngine::new(EngineConfig::new(endpoint))
//!     .with_signer(Signer::new(Credentials::new("AKID", "SECRET")));
//! let transfer = ResumableTransfer::new(S3Client::new(Arc::new(engine))).with_verify(true);
//! let uploaded = transfer.upload_file("bucket", "big.bin", Path::new("big.bin")).await?;
//! println!("stored {} bytes in {} parts", uploaded.size, uploaded.parts);
//! # Ok(())
//! # }
//! ```

mod download;
mod error;
pub mod integrity;
mod source;
mod upload;

pub use download::{DownloadOutcome, MAX_RESTARTS};
pub use error::TransferError;
pub use source::WindowedSource;
pub use upload::{MAX_PARTS, MIN_PART_SIZE, UploadOutcome, plan_parts};

use crate::s3::S3Client;

/// Drives multipart uploads and resumable downloads.
#[derive(Debug, Clone)]
pub struct ResumableTransfer {
    client: S3Client,
    chunk_size: u64,
    verify: bool,
}

impl ResumableTransfer {
    /// Transfers with minimum-size parts and no verification.
    #[must_use]
    pub fn new(client: S3Client) -> Self {
        Self {
            client,
            chunk_size: MIN_PART_SIZE,
            verify: false,
        }
    }

    /// Sets the part size for multipart uploads.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidChunkSize`] below [`MIN_PART_SIZE`].
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Result<Self, TransferError> {
        if chunk_size < MIN_PART_SIZE {
            return Err(TransferError::InvalidChunkSize {
                chunk: chunk_size,
                minimum: MIN_PART_SIZE,
            });
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    /// Checks ETags against local MD5 digests.
    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Configured part size.
    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// The object-storage client.
    #[must_use]
    pub fn client(&self) -> &S3Client {
        &self.client
    }
}
