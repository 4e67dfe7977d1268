//! ETag checks for transferred payloads.

use crate::engine::RequestError;

/// Whether an ETag was produced by a multipart upload.
///
/// Such ETags are not the MD5 of the object and cannot be checked locally.
#[must_use]
pub fn is_multipart_etag(etag: &str) -> bool {
    etag.contains('-')
}

/// Compares a server ETag with a locally computed hex MD5.
///
/// # Errors
///
/// Returns [`RequestError::Integrity`] when they differ.
pub fn check_etag(context: &str, etag: &str, local_md5: &str) -> Result<(), RequestError> {
    let etag = etag.trim_matches('"');
    if etag.eq_ignore_ascii_case(local_md5) {
        return Ok(());
    }
    Err(RequestError::integrity(context, etag, local_md5))
}
