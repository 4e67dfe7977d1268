//! Virtual-host and path-style object addressing.

use std::net::IpAddr;

use crate::signer::{BucketEndpoints, encode_path};

/// Where a bucket-scoped request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Address {
    /// Host override; `None` keeps the endpoint host.
    pub host: Option<String>,
    /// Encoded request path.
    pub path: String,
}

/// Whether `bucket` can be used as a DNS label prefix.
///
/// Lowercase letters, digits, `.` and `-`; 3 to 63 characters; starts and
/// ends with a letter or digit; no empty labels; not an IPv4 address.
#[must_use]
pub fn is_dns_compatible(bucket: &str) -> bool {
    let len_ok = (3..=63).contains(&bucket.len());
    let chars_ok = bucket
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-');
    let edges_ok = bucket
        .bytes()
        .next()
        .zip(bucket.bytes().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());
    let labels_ok = bucket
        .split('.')
        .all(|label| !label.is_empty() && !label.starts_with('-') && !label.ends_with('-'));
    let is_ip = bucket.parse::<std::net::Ipv4Addr>().is_ok();
    len_ok && chars_ok && edges_ok && labels_ok && !is_ip
}

/// Whether the host part of `authority` is a literal IP address.
fn is_ip_authority(authority: &str) -> bool {
    if let Some(rest) = authority.strip_prefix('[') {
        return rest
            .split_once(']')
            .is_some_and(|(host, _)| host.parse::<IpAddr>().is_ok());
    }
    let host = authority
        .rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
        .map_or(authority, |(host, _)| host);
    host.parse::<IpAddr>().is_ok()
}

/// Addresses `bucket` and optional `key` against `authority`.
///
/// The bucket moves into the host only when the result is a name the legacy
/// signer maps back to the same bucket through `endpoints`; anything else,
/// IP endpoints included, is addressed path-style.
pub(crate) fn address(
    authority: &str,
    bucket: &str,
    key: Option<&str>,
    path_style: bool,
    endpoints: &BucketEndpoints,
) -> Address {
    let key = key.map(encode_path).unwrap_or_default();
    let virtual_host = format!("{bucket}.{authority}");
    let r#virtual = !path_style
        && is_dns_compatible(bucket)
        && !is_ip_authority(authority)
        && endpoints.bucket_from_host(&virtual_host).as_deref() == Some(bucket);
    if r#virtual {
        Address {
            host: Some(virtual_host),
            path: format!("/{key}"),
        }
    } else {
        Address {
            host: None,
            path: format!("/{}/{key}", encode_path(bucket)),
        }
    }
}
