use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Signature used for object-storage requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectSignature {
    /// HMAC-SHA1 REST signature.
    #[default]
    Legacy,
    /// Header signature version 4.
    V4,
}

/// Inclusive byte range for a ranged `GET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte.
    pub start: u64,
    /// Last byte, inclusive; open-ended when absent.
    pub end: Option<u64>,
}

impl ByteRange {
    /// Bytes `start..=end`.
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Bytes from `start` to the end of the object.
    #[must_use]
    pub fn starting_at(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Parses `START-END` or `START-`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (start, end) = value.trim().split_once('-')?;
        let start = start.trim().parse().ok()?;
        let end = match end.trim() {
            "" => None,
            end => Some(end.parse().ok()?),
        };
        if end.is_some_and(|end| end < start) {
            return None;
        }
        Some(Self { start, end })
    }
}

impl fmt::Display for ByteRange {
    /// `Range` header value.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "bytes={}-{end}", self.start),
            None => write!(f, "bytes={}-", self.start),
        }
    }
}

/// Object metadata returned by `HEAD`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectHead {
    /// Object size in bytes.
    pub content_length: u64,
    /// Entity tag without quotes.
    pub etag: Option<String>,
    /// Media type.
    pub content_type: Option<String>,
    /// `Last-Modified` as sent.
    pub last_modified: Option<String>,
    /// `x-amz-meta-*` headers, prefix removed.
    pub metadata: BTreeMap<String, String>,
}

/// An in-progress multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingUpload {
    /// Object key.
    pub key: String,
    /// Upload id.
    pub upload_id: String,
    /// When it was initiated, as sent.
    pub initiated: Option<String>,
}

/// One page of in-progress multipart uploads.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MultipartListing {
    /// Uploads on this page.
    pub uploads: Vec<PendingUpload>,
    /// Whether more pages follow.
    pub truncated: bool,
    /// Key marker for the next page.
    pub next_key_marker: Option<String>,
    /// Upload-id marker for the next page.
    pub next_upload_id_marker: Option<String>,
}
