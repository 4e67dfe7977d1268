//! Object-storage REST signature (HMAC-SHA1, `Authorization: AWS key:sig`).
//!
//! When the host carries the bucket as a subdomain of a known endpoint, the
//! bucket is moved into the canonical path. Only a fixed set of sub-resource
//! query parameters takes part in the string to sign.

use std::collections::BTreeMap;
use std::time::SystemTime;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::header::{AUTHORIZATION, DATE};
use sha1::Sha1;

use super::canonical::canonical_query_string;
use super::{Credentials, SignError, SignableRequest, set_header};

/// Endpoints whose subdomains are bucket names.
pub const DEFAULT_BUCKET_ENDPOINTS: &[&str] = &[
    "s3.amazonaws.com",
    "s3-us-west-1.amazonaws.com",
    "s3-us-west-2.amazonaws.com",
    "s3-eu-west-1.amazonaws.com",
    "s3-ap-southeast-1.amazonaws.com",
    "s3-ap-southeast-2.amazonaws.com",
    "s3-ap-northeast-1.amazonaws.com",
    "s3.sa-east-1.amazonaws.com",
];

/// Query parameters that identify a sub-resource and are therefore signed.
pub const SUB_RESOURCES: &[&str] = &[
    "acl",
    "cors",
    "defaultObjectAcl",
    "delete",
    "lifecycle",
    "location",
    "logging",
    "partNumber",
    "policy",
    "requestPayment",
    "response-cache-control",
    "response-content-disposition",
    "response-content-encoding",
    "response-content-language",
    "response-content-type",
    "response-expires",
    "torrent",
    "uploadId",
    "uploads",
    "versionId",
    "versioning",
    "versions",
    "website",
];

const AMZ_PREFIX: &str = "x-amz-";

type HmacSha1 = Hmac<Sha1>;

/// Allow-list of endpoints used to detect a bucket name embedded in a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketEndpoints {
    suffixes: Vec<String>,
}

impl Default for BucketEndpoints {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_ENDPOINTS.iter().copied())
    }
}

impl BucketEndpoints {
    /// Creates an allow-list from endpoint host names.
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: endpoints
                .into_iter()
                .map(|s| s.into().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Returns the bucket encoded as a subdomain of `host`, if any.
    ///
    /// A port suffix is ignored. Hosts under an `s3-external` endpoint are
    /// recognized even when not listed.
    #[must_use]
    pub fn bucket_from_host(&self, host: &str) -> Option<String> {
        let host = host
            .rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map_or(host, |(name, _)| name)
            .to_ascii_lowercase();

        for suffix in &self.suffixes {
            if let Some(bucket) = host
                .strip_suffix(suffix.as_str())
                .and_then(|rest| rest.strip_suffix('.'))
                .filter(|bucket| !bucket.is_empty())
            {
                return Some(bucket.to_string());
            }
        }

        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() > 3 && labels[labels.len() - 3].contains("s3-external") {
            return Some(labels[..labels.len() - 3].join("."));
        }
        None
    }
}

pub(super) fn sign(
    credentials: &Credentials,
    endpoints: &BucketEndpoints,
    now: DateTime<Utc>,
    expires: Option<i64>,
    request: &mut SignableRequest<'_>,
) -> Result<(), SignError> {
    let date = httpdate::fmt_http_date(SystemTime::from(now));
    set_header(&mut request.headers, DATE, &date)?;

    let path = match endpoints.bucket_from_host(request.host) {
        Some(bucket) => format!("/{bucket}{}", request.uri),
        None => request.uri.to_string(),
    };
    let string_to_sign = string_to_sign(request, &path, expires)?;

    let mut mac = HmacSha1::new_from_slice(credentials.secret_key().as_bytes())
        .unwrap_or_else(|_| unreachable!());
    mac.update(string_to_sign.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    set_header(
        &mut request.headers,
        AUTHORIZATION,
        &format!("AWS {}:{signature}", credentials.access_key()),
    )
}

fn string_to_sign(
    request: &SignableRequest<'_>,
    path: &str,
    expires: Option<i64>,
) -> Result<String, SignError> {
    let mut interesting: BTreeMap<String, String> = BTreeMap::new();
    interesting.insert("content-md5".into(), String::new());
    interesting.insert("content-type".into(), String::new());
    for (name, value) in &request.headers {
        let key = name.as_str();
        if matches!(key, "content-md5" | "content-type" | "date") || key.starts_with(AMZ_PREFIX) {
            let text = value
                .to_str()
                .map_err(|_| SignError::non_ascii_header(key))?;
            interesting.insert(key.to_string(), text.trim().to_string());
        }
    }
    if let Some(expires) = expires {
        interesting.insert("date".into(), expires.to_string());
    }

    let mut lines = vec![request.method.as_str().to_string()];
    for (key, value) in interesting {
        if key.starts_with(AMZ_PREFIX) {
            lines.push(format!("{key}:{value}"));
        } else {
            lines.push(value);
        }
    }
    let sub_resources = canonical_query_string(&request.query, Some(SUB_RESOURCES));
    if sub_resources.is_empty() {
        lines.push(path.to_string());
    } else {
        lines.push(format!("{path}?{sub_resources}"));
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use http::header::{CONTENT_TYPE, HeaderValue};
    use http::{HeaderMap, Method};

    use crate::signer::{Payload, QueryParams, SigningScheme, Signer};

    use super::*;

    fn request<'a>(method: &'a Method, host: &'a str, uri: &'a str) -> SignableRequest<'a> {
        SignableRequest {
            method,
            host,
            uri,
            headers: HeaderMap::new(),
            query: QueryParams::new(),
            payload: Payload::Unsigned,
        }
    }

    // ==================== Bucket Detection Tests ====================

    #[test]
    fn test_bucket_detected_from_listed_endpoint() {
        let endpoints = BucketEndpoints::default();
        assert_eq!(
            endpoints.bucket_from_host("johnsmith.s3.amazonaws.com"),
            Some("johnsmith".to_string())
        );
        assert_eq!(
            endpoints.bucket_from_host("my.dotted.bucket.s3-eu-west-1.amazonaws.com:443"),
            Some("my.dotted.bucket".to_string())
        );
    }

    #[test]
    fn test_bare_endpoint_has_no_bucket() {
        let endpoints = BucketEndpoints::default();
        assert_eq!(endpoints.bucket_from_host("s3.amazonaws.com"), None);
        assert_eq!(endpoints.bucket_from_host("localhost:9000"), None);
    }

    #[test]
    fn test_s3_external_fallback() {
        let endpoints = BucketEndpoints::default();
        assert_eq!(
            endpoints.bucket_from_host("logs.s3-external-1.amazonaws.com"),
            Some("logs".to_string())
        );
    }

    #[test]
    fn test_custom_allow_list_replaces_defaults() {
        let endpoints = BucketEndpoints::new(["s3.eu-central-1.amazonaws.com"]);
        assert_eq!(
            endpoints.bucket_from_host("data.s3.eu-central-1.amazonaws.com"),
            Some("data".to_string())
        );
        assert_eq!(endpoints.bucket_from_host("data.s3.amazonaws.com"), None);
    }

    // ==================== String To Sign Tests ====================

    #[test]
    fn test_string_to_sign_includes_empty_md5_and_type() {
        let mut req = request(&Method::GET, "johnsmith.s3.amazonaws.com", "/photos/puppy.jpg");
        req.headers.insert(
            DATE,
            HeaderValue::from_static("Tue, 27 Mar 2007 19:36:42 +0000"),
        );

        let rendered = string_to_sign(&req, "/johnsmith/photos/puppy.jpg", None).unwrap();

        assert_eq!(
            rendered,
            "GET\n\n\nTue, 27 Mar 2007 19:36:42 +0000\n/johnsmith/photos/puppy.jpg"
        );
    }

    #[test]
    fn test_string_to_sign_amz_headers_and_sub_resources() {
        let mut req = request(&Method::PUT, "s3.amazonaws.com", "/bucket/key");
        req.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        req.headers
            .insert("x-amz-meta-owner", HeaderValue::from_static(" alice "));
        req.headers
            .insert("x-custom", HeaderValue::from_static("ignored"));
        req.query.insert("partNumber".into(), Some("2".into()));
        req.query.insert("uploadId".into(), Some("abc".into()));
        req.query.insert("prefix".into(), Some("ignored".into()));

        let rendered = string_to_sign(&req, "/bucket/key", Some(1_175_139_620)).unwrap();

        assert_eq!(
            rendered,
            "PUT\n\ntext/plain\n1175139620\nx-amz-meta-owner:alice\n/bucket/key?partNumber=2&uploadId=abc"
        );
    }

    #[test]
    fn test_flag_sub_resource_rendered_bare() {
        let mut req = request(&Method::POST, "s3.amazonaws.com", "/bucket/key");
        req.query.insert("uploads".into(), None);

        let rendered = string_to_sign(&req, "/bucket/key", Some(0)).unwrap();

        assert!(rendered.ends_with("/bucket/key?uploads"));
    }

    // ==================== Signing Tests ====================

    #[test]
    fn test_sign_sets_date_and_authorization() {
        let now = Utc.with_ymd_and_hms(2007, 3, 27, 19, 36, 42).unwrap();
        let signer = Signer::new(Credentials::new("AKID", "secret"));

        let signed = signer
            .sign(
                &SigningScheme::LegacyRestHeader { expires: None },
                now,
                request(&Method::GET, "johnsmith.s3.amazonaws.com", "/photos/puppy.jpg"),
            )
            .unwrap();

        assert_eq!(
            signed.headers.get(DATE).unwrap(),
            "Tue, 27 Mar 2007 19:36:42 GMT"
        );
        let auth = signed.headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        let signature = auth.strip_prefix("AWS AKID:").unwrap();
        assert_eq!(STANDARD.decode(signature).unwrap().len(), 20);
    }

    #[test]
    fn test_virtual_host_and_path_style_sign_identically() {
        let now = Utc.with_ymd_and_hms(2007, 3, 27, 19, 36, 42).unwrap();
        let signer = Signer::new(Credentials::new("AKID", "secret"));
        let scheme = SigningScheme::LegacyRestHeader { expires: None };

        let virtual_host = signer
            .sign(
                &scheme,
                now,
                request(&Method::GET, "johnsmith.s3.amazonaws.com", "/puppy.jpg"),
            )
            .unwrap();
        let path_style = signer
            .sign(
                &scheme,
                now,
                request(&Method::GET, "s3.amazonaws.com", "/johnsmith/puppy.jpg"),
            )
            .unwrap();

        assert_eq!(
            virtual_host.headers.get(AUTHORIZATION),
            path_style.headers.get(AUTHORIZATION)
        );
    }
}
