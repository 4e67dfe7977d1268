//! Transfer errors.

use std::io;

use thiserror::Error;

use crate::engine::RequestError;

/// Errors from resumable uploads and downloads.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A request failed.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Reading the upload source failed.
    #[error("cannot read {what}: {source}")]
    Source {
        /// What was being read.
        what: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Writing or repositioning the download sink failed.
    #[error("cannot write {what}: {source}")]
    Sink {
        /// What was being written.
        what: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The part size is below the service minimum.
    #[error("chunk size {chunk} is below the minimum part size {minimum}")]
    InvalidChunkSize {
        /// Requested chunk size.
        chunk: u64,
        /// Smallest accepted part size.
        minimum: u64,
    },

    /// The server kept restarting a resumed download from the beginning.
    #[error("download of {object} restarted {restarts} times without completing")]
    Incomplete {
        /// `bucket/key` being downloaded.
        object: String,
        /// How many times the download started over.
        restarts: u32,
    },
}

impl TransferError {
    pub(crate) fn read_failed(what: impl Into<String>, source: io::Error) -> Self {
        Self::Source {
            what: what.into(),
            source,
        }
    }

    pub(crate) fn write_failed(what: impl Into<String>, source: io::Error) -> Self {
        Self::Sink {
            what: what.into(),
            source,
        }
    }
}
