//! Query-string signature version 2.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};

use super::canonical::canonical_query_string;
use super::{Credentials, SignableRequest, hmac_sha256};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub(super) fn sign(
    credentials: &Credentials,
    now: DateTime<Utc>,
    expires: Option<DateTime<Utc>>,
    request: &mut SignableRequest<'_>,
) {
    let query = &mut request.query;
    query.insert(
        "AWSAccessKeyId".into(),
        Some(credentials.access_key().to_string()),
    );
    query.insert("SignatureVersion".into(), Some("2".into()));
    query.insert("SignatureMethod".into(), Some("HmacSHA256".into()));
    match expires {
        Some(at) => {
            query.insert("Expires".into(), Some(at.format(TIMESTAMP_FORMAT).to_string()));
        }
        None => {
            query.insert(
                "Timestamp".into(),
                Some(now.format(TIMESTAMP_FORMAT).to_string()),
            );
        }
    }

    let string_to_sign = string_to_sign(request);
    let signature = STANDARD.encode(hmac_sha256(
        credentials.secret_key().as_bytes(),
        string_to_sign.as_bytes(),
    ));
    request.query.insert("Signature".into(), Some(signature));
}

fn string_to_sign(request: &SignableRequest<'_>) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        request.method.as_str(),
        request.host,
        request.uri,
        canonical_query_string(&request.query, None)
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use http::{HeaderMap, Method};

    use super::*;
    use crate::signer::{Payload, QueryParams, SigningScheme, Signer};

    fn request(method: &Method, query: QueryParams) -> SignableRequest<'_> {
        SignableRequest {
            method,
            host: "sdb.amazonaws.com",
            uri: "/",
            headers: HeaderMap::new(),
            query,
            payload: Payload::Bytes(b""),
        }
    }

    #[test]
    fn test_v2_adds_auth_parameters_and_timestamp() {
        let now = Utc.with_ymd_and_hms(2013, 1, 2, 3, 4, 5).unwrap();
        let signer = Signer::new(Credentials::new("AKID", "secret"));
        let mut query = QueryParams::new();
        query.insert("Action".into(), Some("ListDomains".into()));

        let signed = signer
            .sign(&SigningScheme::QueryV2 { expires: None }, now, request(&Method::GET, query))
            .unwrap();

        assert_eq!(signed.query["AWSAccessKeyId"].as_deref(), Some("AKID"));
        assert_eq!(signed.query["SignatureVersion"].as_deref(), Some("2"));
        assert_eq!(signed.query["SignatureMethod"].as_deref(), Some("HmacSHA256"));
        assert_eq!(
            signed.query["Timestamp"].as_deref(),
            Some("2013-01-02T03:04:05Z")
        );
        assert!(!signed.query.contains_key("Expires"));
        assert!(signed.query.contains_key("Signature"));
    }

    #[test]
    fn test_v2_expires_replaces_timestamp() {
        let now = Utc.with_ymd_and_hms(2013, 1, 2, 3, 4, 5).unwrap();
        let expires = Utc.with_ymd_and_hms(2013, 1, 3, 0, 0, 0).unwrap();
        let signer = Signer::new(Credentials::new("AKID", "secret"));

        let signed = signer
            .sign(
                &SigningScheme::QueryV2 {
                    expires: Some(expires),
                },
                now,
                request(&Method::GET, QueryParams::new()),
            )
            .unwrap();

        assert_eq!(signed.query["Expires"].as_deref(), Some("2013-01-03T00:00:00Z"));
        assert!(!signed.query.contains_key("Timestamp"));
    }

    #[test]
    fn test_v2_string_to_sign_layout() {
        let mut query = QueryParams::new();
        query.insert("b".into(), Some("2".into()));
        query.insert("a".into(), Some("x y".into()));

        let rendered = string_to_sign(&request(&Method::GET, query));

        assert_eq!(rendered, "GET\nsdb.amazonaws.com\n/\na=x%20y&b=2");
    }

    #[test]
    fn test_v2_signature_is_base64_hmac_sha256() {
        let now = Utc.with_ymd_and_hms(2013, 1, 2, 3, 4, 5).unwrap();
        let signer = Signer::new(Credentials::new("AKID", "secret"));

        let signed = signer
            .sign(&SigningScheme::QueryV2 { expires: None }, now, request(&Method::GET, QueryParams::new()))
            .unwrap();

        let signature = signed.query["Signature"].clone().unwrap();
        let raw = STANDARD.decode(signature).unwrap();
        assert_eq!(raw.len(), 32);
    }
}
