//! Signature version 4 in header and query-string form.

use chrono::{DateTime, Utc};
use http::header::{AUTHORIZATION, HeaderName};

use super::canonical::{
    canonical_header_pairs, canonical_headers, canonical_query_string, sha256_hex,
    signed_header_names,
};
use super::{Credentials, SignError, SignableRequest, hmac_sha256, set_header};

/// Payload hash used when the body is streamed and not hashed up front.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const TERMINATOR: &str = "aws4_request";
/// Longest validity a presigned URL may carry (7 days).
const MAX_EXPIRES_SECS: u64 = 604_800;

const X_AMZ_DATE: HeaderName = HeaderName::from_static("x-amz-date");
const X_AMZ_CONTENT_SHA256: HeaderName = HeaderName::from_static("x-amz-content-sha256");

pub(super) struct Scope<'a> {
    region: &'a str,
    service: &'a str,
}

impl<'a> Scope<'a> {
    pub(super) fn new(region: &'a str, service: &'a str) -> Self {
        Self { region, service }
    }

    fn credential_scope(&self, now: DateTime<Utc>) -> String {
        format!(
            "{}/{}/{}/{TERMINATOR}",
            now.format("%Y%m%d"),
            self.region,
            self.service
        )
    }

    fn signing_key(&self, secret: &str, now: DateTime<Utc>) -> Vec<u8> {
        let date = now.format("%Y%m%d").to_string();
        let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        hmac_sha256(&k_service, TERMINATOR.as_bytes())
    }
}

fn amz_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

fn canonical_request(
    request: &SignableRequest<'_>,
    pairs: &[(String, String)],
    payload_hash: &str,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n\n{}\n{}",
        request.method.as_str(),
        request.uri,
        canonical_query_string(&request.query, None),
        canonical_headers(pairs),
        signed_header_names(pairs),
        payload_hash
    )
}

fn signature(
    credentials: &Credentials,
    scope: &Scope<'_>,
    now: DateTime<Utc>,
    canonical_request: &str,
) -> String {
    let string_to_sign = format!(
        "{ALGORITHM}\n{}\n{}\n{}",
        amz_date(now),
        scope.credential_scope(now),
        sha256_hex(canonical_request.as_bytes())
    );
    let key = scope.signing_key(credentials.secret_key(), now);
    hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()))
}

pub(super) fn sign_header(
    credentials: &Credentials,
    now: DateTime<Utc>,
    scope: &Scope<'_>,
    request: &mut SignableRequest<'_>,
) -> Result<(), SignError> {
    let payload_hash = request.payload.hash();
    set_header(&mut request.headers, X_AMZ_DATE, &amz_date(now))?;
    if scope.service == "s3" {
        set_header(&mut request.headers, X_AMZ_CONTENT_SHA256, &payload_hash)?;
    }

    let pairs = canonical_header_pairs(&request.headers)?;
    let canonical = canonical_request(request, &pairs, &payload_hash);
    let signature = signature(credentials, scope, now, &canonical);
    let authorization = format!(
        "{ALGORITHM} Credential={}/{}, SignedHeaders={}, Signature={signature}",
        credentials.access_key(),
        scope.credential_scope(now),
        signed_header_names(&pairs)
    );
    set_header(&mut request.headers, AUTHORIZATION, &authorization)
}

pub(super) fn sign_query(
    credentials: &Credentials,
    now: DateTime<Utc>,
    scope: &Scope<'_>,
    expires_in: u64,
    request: &mut SignableRequest<'_>,
) -> Result<(), SignError> {
    if expires_in == 0 || expires_in > MAX_EXPIRES_SECS {
        return Err(SignError::invalid_parameter(format!(
            "expiry of {expires_in}s is outside 1..={MAX_EXPIRES_SECS}"
        )));
    }
    let host = request
        .headers
        .get(http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(request.host)
        .trim()
        .to_string();
    let pairs = vec![("host".to_string(), host)];

    let query = &mut request.query;
    query.insert("X-Amz-Algorithm".into(), Some(ALGORITHM.into()));
    query.insert(
        "X-Amz-Credential".into(),
        Some(format!(
            "{}/{}",
            credentials.access_key(),
            scope.credential_scope(now)
        )),
    );
    query.insert("X-Amz-Date".into(), Some(amz_date(now)));
    query.insert("X-Amz-Expires".into(), Some(expires_in.to_string()));
    query.insert("X-Amz-SignedHeaders".into(), Some(signed_header_names(&pairs)));

    let payload_hash = if scope.service == "s3" {
        UNSIGNED_PAYLOAD.to_string()
    } else {
        request.payload.hash()
    };
    let canonical = canonical_request(request, &pairs, &payload_hash);
    let signature = signature(credentials, scope, now, &canonical);
    request
        .query
        .insert("X-Amz-Signature".into(), Some(signature));
    Ok(())
}
