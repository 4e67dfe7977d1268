//! Canonical forms shared by every signing scheme.
//!
//! Query strings are sorted by key and percent-encoded with the RFC 3986
//! unreserved set (`A-Z a-z 0-9 - _ . ~`). Space becomes `%20`, never `+`.

use std::collections::BTreeMap;

use http::HeaderMap;
use sha2::{Digest, Sha256};

use super::SignError;

/// Query parameters of a request, sorted by key.
///
/// A `None` value is a bare flag parameter such as `?uploads`.
pub type QueryParams = BTreeMap<String, Option<String>>;

/// Headers that are never part of a V4 canonical request.
///
/// Hop-by-hop and client-identification headers may be rewritten in transit.
const UNSIGNED_HEADERS: &[&str] = &["connection", "user-agent", "expect", "transfer-encoding"];

/// Percent-encodes a single query key or value.
#[must_use]
pub fn uri_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Percent-encodes an object key for use in a request path, keeping `/` separators.
#[must_use]
pub fn encode_path(path: &str) -> String {
    path.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

/// Builds the canonical query string: sorted, encoded, `k=v` joined with `&`.
///
/// When `whitelist` is given only the listed keys participate. Flag
/// parameters render as the bare key.
#[must_use]
pub fn canonical_query_string(query: &QueryParams, whitelist: Option<&[&str]>) -> String {
    query
        .iter()
        .filter(|(key, _)| whitelist.is_none_or(|allowed| allowed.contains(&key.as_str())))
        .map(|(key, value)| match value {
            Some(value) => format!("{}={}", uri_encode(key), uri_encode(value)),
            None => uri_encode(key),
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercased, trimmed, sorted header pairs used by V4 signing.
///
/// Repeated headers are joined with `,` in insertion order.
pub(crate) fn canonical_header_pairs(headers: &HeaderMap) -> Result<Vec<(String, String)>, SignError> {
    let mut pairs: BTreeMap<String, String> = BTreeMap::new();
    for name in headers.keys() {
        let key = name.as_str();
        if UNSIGNED_HEADERS.contains(&key) {
            continue;
        }
        let mut values = Vec::new();
        for value in headers.get_all(name) {
            let text = value
                .to_str()
                .map_err(|_| SignError::non_ascii_header(key))?;
            values.push(text.trim().to_string());
        }
        pairs.insert(key.to_string(), values.join(","));
    }
    Ok(pairs.into_iter().collect())
}

/// Renders canonical header pairs as `name:value` lines.
pub(crate) fn canonical_headers(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(name, value)| format!("{name}:{value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders the `;`-joined list of signed header names.
pub(crate) fn signed_header_names(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";")
}

/// Hex-encoded SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
