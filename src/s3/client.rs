//! Object and multipart operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::Utc;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, LAST_MODIFIED, RANGE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use quick_xml::escape::escape;
use tracing::{debug, info, instrument, warn};

use super::addressing::{Address, address};
use super::types::{ByteRange, MultipartListing, ObjectHead, ObjectSignature, PendingUpload};
use crate::decoder::StructuredValue;
use crate::engine::{
    Body, ExpectedStatus, Request, RequestEngine, RequestError, RequestOptions, Response,
};
use crate::service::AwsErrorClassifier;
use crate::signer::{
    BucketEndpoints, Payload, QueryParams, SignableRequest, SigningScheme, canonical_query_string,
};
use crate::transfer::integrity::check_etag;

/// Service name in V4 credential scopes.
const SERVICE: &str = "s3";

/// Default region for V4 scopes.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Object-storage client over a shared [`RequestEngine`].
#[derive(Debug, Clone)]
pub struct S3Client {
    engine: Arc<RequestEngine>,
    path_style: bool,
    signature: ObjectSignature,
    region: String,
}

impl S3Client {
    /// Client with virtual-host addressing and legacy signing.
    #[must_use]
    pub fn new(engine: Arc<RequestEngine>) -> Self {
        Self {
            engine,
            path_style: false,
            signature: ObjectSignature::Legacy,
            region: DEFAULT_REGION.to_string(),
        }
    }

    /// Always uses path-style addressing.
    #[must_use]
    pub fn with_path_style(mut self, path_style: bool) -> Self {
        self.path_style = path_style;
        self
    }

    /// Selects the request signature.
    #[must_use]
    pub fn with_signature(mut self, signature: ObjectSignature) -> Self {
        self.signature = signature;
        self
    }

    /// Region for V4 scopes and presigned URLs.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// The underlying engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<RequestEngine> {
        &self.engine
    }

    fn address(&self, bucket: &str, key: Option<&str>) -> Address {
        let authority = self.engine.config().endpoint.authority();
        match self.engine.signer() {
            Some(signer) => address(
                &authority,
                bucket,
                key,
                self.path_style,
                signer.bucket_endpoints(),
            ),
            None => address(
                &authority,
                bucket,
                key,
                self.path_style,
                &BucketEndpoints::default(),
            ),
        }
    }

    fn scheme(&self) -> SigningScheme {
        match self.signature {
            ObjectSignature::Legacy => SigningScheme::LegacyRestHeader { expires: None },
            ObjectSignature::V4 => SigningScheme::HeaderV4 {
                region: self.region.clone(),
                service: SERVICE.to_string(),
            },
        }
    }

    fn request<'a>(&self, method: Method, bucket: &str, key: Option<&str>) -> Request<'a> {
        let Address { host, path } = self.address(bucket, key);
        let mut request = Request::new(method, path).signed(self.scheme());
        if let Some(host) = host {
            request = request.host(host);
        }
        request
    }

    fn invalid_response(&self, response: &Response, message: impl Into<String>) -> RequestError {
        RequestError::data(
            &self.engine.config().endpoint,
            response.status,
            response.headers.clone(),
            message,
            Bytes::new(),
        )
    }

    /// Decoded body of a structured response whose root must be `root`.
    ///
    /// A `200` carrying an `Error` document is turned into a service error.
    fn expect_root<'r>(
        &self,
        response: &'r Response,
        root: &str,
    ) -> Result<&'r StructuredValue, RequestError> {
        let value = response
            .structured()
            .ok_or_else(|| self.invalid_response(response, format!("expected <{root}> body")))?;
        if value.get(root).is_some() {
            return Ok(value);
        }
        if let Some(error) =
            AwsErrorClassifier::extract(value, response.status, &response.headers)
        {
            return Err(RequestError::Service(error));
        }
        Err(self.invalid_response(
            response,
            format!(
                "expected <{root}> body, got <{}>",
                value.root_name().unwrap_or("?")
            ),
        ))
    }

    /// Checks that a result names the bucket and key it was issued for.
    fn check_target(
        &self,
        response: &Response,
        value: &StructuredValue,
        root: &str,
        bucket: &str,
        key: &str,
    ) -> Result<(), RequestError> {
        let got_bucket = value.text_at(&[root, "Bucket"]);
        let got_key = value.text_at(&[root, "Key"]);
        if got_bucket == Some(bucket) && got_key == Some(key) {
            return Ok(());
        }
        Err(self.invalid_response(
            response,
            format!(
                "result names {}/{} instead of {bucket}/{key}",
                got_bucket.unwrap_or("?"),
                got_key.unwrap_or("?")
            ),
        ))
    }

    /// Uploads `body` as `bucket/key` and returns the ETag.
    ///
    /// When `content_md5` is given it is sent as `Content-MD5` and the
    /// returned ETag must match it.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Integrity`] on an ETag mismatch, or any
    /// engine error.
    #[instrument(skip(self, body, content_md5), fields(size = body.len()))]
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Body<'_>,
        content_md5: Option<[u8; 16]>,
    ) -> Result<String, RequestError> {
        let mut request = self.request(Method::PUT, bucket, Some(key)).body(body);
        if let Some(md5) = content_md5 {
            request = request.header(
                HeaderName::from_static("content-md5"),
                header_value(&BASE64.encode(md5))?,
            );
        }
        let response = self.engine.execute(request, RequestOptions::default()).await?;
        let etag = response
            .etag()
            .map(str::to_string)
            .ok_or_else(|| self.invalid_response(&response, "missing ETag"))?;
        if let Some(md5) = content_md5 {
            check_etag(&format!("{bucket}/{key}"), &etag, &hex::encode(md5))?;
        }
        debug!(%etag, "object stored");
        Ok(etag)
    }

    /// Downloads `bucket/key`, optionally a byte range of it.
    ///
    /// `options` supplies the sink, sink wrapper and deadline. Unless it
    /// names its own accepted statuses, `200` is accepted, plus `206` when a
    /// range is requested.
    ///
    /// # Errors
    ///
    /// Returns any engine error, including
    /// [`RequestError::PartialReception`] when the body is cut short.
    #[instrument(skip(self, options))]
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
        options: RequestOptions,
    ) -> Result<Response, RequestError> {
        let mut request = self.request(Method::GET, bucket, Some(key));
        let chosen = options.expected != ExpectedStatus::default();
        let options = match range {
            Some(range) => {
                request = request.header(RANGE, header_value(&range.to_string())?);
                if chosen {
                    options
                } else {
                    options.expect([StatusCode::OK, StatusCode::PARTIAL_CONTENT])
                }
            }
            None => options,
        };
        self.engine.execute(request, options).await
    }

    /// Fetches the metadata of `bucket/key`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Status`] for a missing object, or any engine
    /// error.
    #[instrument(skip(self))]
    pub async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, RequestError> {
        let request = self.request(Method::HEAD, bucket, Some(key));
        let response = self.engine.execute(request, RequestOptions::default()).await?;
        let content_length = response
            .header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| self.invalid_response(&response, "missing Content-Length"))?;
        let metadata = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                let name = name.as_str().strip_prefix("x-amz-meta-")?;
                Some((name.to_string(), value.to_str().ok()?.to_string()))
            })
            .collect::<BTreeMap<_, _>>();
        Ok(ObjectHead {
            content_length,
            etag: response.etag().map(str::to_string),
            content_type: response.header(CONTENT_TYPE.as_str()).map(str::to_string),
            last_modified: response.header(LAST_MODIFIED.as_str()).map(str::to_string),
            metadata,
        })
    }

    /// Starts a multipart upload and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Data`] if the result names another object or
    /// lacks an upload id, or any engine error.
    #[instrument(skip(self))]
    pub async fn initiate_multipart(&self, bucket: &str, key: &str) -> Result<String, RequestError> {
        const ROOT: &str = "InitiateMultipartUploadResult";
        let request = self.request(Method::POST, bucket, Some(key)).flag("uploads");
        let response = self
            .engine
            .execute(request, RequestOptions::default().structured())
            .await?;
        let value = self.expect_root(&response, ROOT)?;
        self.check_target(&response, value, ROOT, bucket, key)?;
        let upload_id = value
            .text_at(&[ROOT, "UploadId"])
            .filter(|id| !id.is_empty())
            .ok_or_else(|| self.invalid_response(&response, "missing UploadId"))?;
        info!(upload_id, "multipart upload initiated");
        Ok(upload_id.to_string())
    }

    /// Uploads part `part_number` of an upload and returns its ETag.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Data`] if no ETag comes back, or any engine
    /// error.
    #[instrument(skip(self, body), fields(size = body.len()))]
    pub async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Body<'_>,
    ) -> Result<String, RequestError> {
        let request = self
            .request(Method::PUT, bucket, Some(key))
            .query("partNumber", part_number.to_string())
            .query("uploadId", upload_id)
            .body(body);
        let response = self.engine.execute(request, RequestOptions::default()).await?;
        response
            .etag()
            .map(str::to_string)
            .ok_or_else(|| self.invalid_response(&response, "missing ETag"))
    }

    /// Completes an upload from its ordered `(part number, ETag)` list and
    /// returns the object's ETag.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Service`] when the service reports an error,
    /// even inside a `200` response, or any engine error.
    #[instrument(skip(self, parts), fields(parts = parts.len()))]
    pub async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> Result<String, RequestError> {
        const ROOT: &str = "CompleteMultipartUploadResult";
        let request = self
            .request(Method::POST, bucket, Some(key))
            .query("uploadId", upload_id)
            .body(complete_body(parts));
        let response = self
            .engine
            .execute(request, RequestOptions::default().structured())
            .await?;
        let value = self.expect_root(&response, ROOT)?;
        self.check_target(&response, value, ROOT, bucket, key)?;
        let etag = value
            .text_at(&[ROOT, "ETag"])
            .map(|etag| etag.trim_matches('"').to_string())
            .unwrap_or_default();
        info!(upload_id, %etag, "multipart upload completed");
        Ok(etag)
    }

    /// Aborts an upload, discarding its parts.
    ///
    /// # Errors
    ///
    /// Returns any engine error; success is `204 No Content`.
    #[instrument(skip(self))]
    pub async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), RequestError> {
        let request = self
            .request(Method::DELETE, bucket, Some(key))
            .query("uploadId", upload_id);
        self.engine
            .execute(
                request,
                RequestOptions::default().expect([StatusCode::NO_CONTENT]),
            )
            .await?;
        warn!(upload_id, "multipart upload aborted");
        Ok(())
    }

    /// Lists one page of in-progress uploads.
    ///
    /// # Errors
    ///
    /// Returns any engine error.
    #[instrument(skip(self))]
    pub async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        key_marker: Option<&str>,
        upload_id_marker: Option<&str>,
    ) -> Result<MultipartListing, RequestError> {
        const ROOT: &str = "ListMultipartUploadsResult";
        let mut request = self.request(Method::GET, bucket, None).flag("uploads");
        for (name, value) in [
            ("prefix", prefix),
            ("key-marker", key_marker),
            ("upload-id-marker", upload_id_marker),
        ] {
            if let Some(value) = value {
                request = request.query(name, value);
            }
        }
        let response = self
            .engine
            .execute(request, RequestOptions::default().structured())
            .await?;
        let value = self.expect_root(&response, ROOT)?;
        let uploads = value
            .path(&[ROOT, "Upload"])
            .map(|uploads| {
                uploads
                    .items()
                    .into_iter()
                    .filter_map(|upload| {
                        Some(PendingUpload {
                            key: upload.text_at(&["Key"])?.to_string(),
                            upload_id: upload.text_at(&["UploadId"])?.to_string(),
                            initiated: upload.text_at(&["Initiated"]).map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let text = |field: &str| {
            value
                .text_at(&[ROOT, field])
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        };
        Ok(MultipartListing {
            uploads,
            truncated: text("IsTruncated").as_deref() == Some("true"),
            next_key_marker: text("NextKeyMarker"),
            next_upload_id_marker: text("NextUploadIdMarker"),
        })
    }

    /// Aborts every in-progress upload under `prefix` and returns how many
    /// were aborted.
    ///
    /// # Errors
    ///
    /// Stops at the first listing or abort failure.
    #[instrument(skip(self))]
    pub async fn abort_pending_uploads(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<usize, RequestError> {
        let mut aborted = 0;
        let mut key_marker: Option<String> = None;
        let mut upload_id_marker: Option<String> = None;
        loop {
            let page = self
                .list_multipart_uploads(
                    bucket,
                    prefix,
                    key_marker.as_deref(),
                    upload_id_marker.as_deref(),
                )
                .await?;
            for upload in &page.uploads {
                self.abort_multipart(bucket, &upload.key, &upload.upload_id)
                    .await?;
                aborted += 1;
            }
            if !page.truncated || page.next_key_marker.is_none() {
                break;
            }
            key_marker = page.next_key_marker;
            upload_id_marker = page.next_upload_id_marker;
        }
        info!(aborted, "pending uploads aborted");
        Ok(aborted)
    }

    /// Builds a presigned `GET` URL valid for `expires_in` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidRequest`] without credentials, or
    /// [`RequestError::Sign`] when `expires_in` is outside 1..=604800.
    pub fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: u64,
    ) -> Result<String, RequestError> {
        let signer = self
            .engine
            .signer()
            .ok_or_else(|| RequestError::invalid_request("presigning requires credentials"))?;
        let Address { host, path } = self.address(bucket, Some(key));
        let endpoint = &self.engine.config().endpoint;
        let destination = match host {
            Some(host) => endpoint.with_authority(&host).map_err(|error| {
                RequestError::invalid_request(format!("bad bucket host: {error}"))
            })?,
            None => endpoint.clone(),
        };
        let signed = signer.sign(
            &SigningScheme::QueryV4 {
                region: self.region.clone(),
                service: SERVICE.to_string(),
                expires_in,
            },
            Utc::now(),
            SignableRequest {
                method: &Method::GET,
                host: &destination.authority(),
                uri: &path,
                headers: HeaderMap::new(),
                query: QueryParams::new(),
                payload: Payload::Unsigned,
            },
        )?;
        Ok(format!(
            "{destination}{path}?{}",
            canonical_query_string(&signed.query, None)
        ))
    }
}

fn header_value(value: &str) -> Result<HeaderValue, RequestError> {
    HeaderValue::from_str(value)
        .map_err(|_| RequestError::invalid_request(format!("invalid header value {value:?}")))
}

/// `CompleteMultipartUpload` document for `parts`.
fn complete_body(parts: &[(u32, String)]) -> String {
    let mut body = String::from("<CompleteMultipartUpload>");
    for (number, etag) in parts {
        body.push_str(&format!(
            "<Part><PartNumber>{number}</PartNumber><ETag>{}</ETag></Part>",
            escape(etag.as_str())
        ));
    }
    body.push_str("</CompleteMultipartUpload>");
    body
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::http::Destination;
    use crate::signer::{Credentials, Signer};

    fn client(path_style: bool) -> S3Client {
        let engine = RequestEngine::new(EngineConfig::new(Destination::new(
            "s3.amazonaws.com",
            None,
            true,
        )))
        .with_signer(Signer::new(Credentials::new("AKID", "SECRET")));
        S3Client::new(Arc::new(engine)).with_path_style(path_style)
    }

    #[test]
    fn test_complete_body_lists_parts_in_order() {
        let body = complete_body(&[(1, "\"a\"".to_string()), (2, "\"b\"".to_string())]);
        assert_eq!(
            body,
            "<CompleteMultipartUpload>\
             <Part><PartNumber>1</PartNumber><ETag>&quot;a&quot;</ETag></Part>\
             <Part><PartNumber>2</PartNumber><ETag>&quot;b&quot;</ETag></Part>\
             </CompleteMultipartUpload>"
        );
    }

    #[test]
    fn test_request_uses_virtual_host() {
        let request = client(false).request(Method::GET, "photos", Some("a b.jpg"));
        assert_eq!(request.host.as_deref(), Some("photos.s3.amazonaws.com"));
        assert_eq!(request.uri, "/a%20b.jpg");
        assert_eq!(
            request.scheme,
            Some(SigningScheme::LegacyRestHeader { expires: None })
        );
    }

    fn client_at(host: &str, port: Option<u16>) -> S3Client {
        let engine = RequestEngine::new(EngineConfig::new(Destination::new(host, port, true)))
            .with_signer(Signer::new(Credentials::new("AKID", "SECRET")));
        S3Client::new(Arc::new(engine))
    }

    fn legacy_authorization(host: &str, uri: &str) -> HeaderValue {
        use chrono::TimeZone;

        let signer = Signer::new(Credentials::new("AKID", "SECRET"));
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let signed = signer
            .sign(
                &SigningScheme::LegacyRestHeader { expires: None },
                now,
                SignableRequest {
                    method: &Method::GET,
                    host,
                    uri,
                    headers: HeaderMap::new(),
                    query: QueryParams::new(),
                    payload: Payload::Unsigned,
                },
            )
            .unwrap();
        signed.headers.get(http::header::AUTHORIZATION).unwrap().clone()
    }

    #[test]
    fn test_unlisted_endpoint_signs_bucket_in_resource() {
        let client = client_at("s3.eu-central-1.amazonaws.com", None);
        let request = client.request(Method::GET, "photos", Some("a.jpg"));
        assert_eq!(request.host, None);
        assert_eq!(request.uri, "/photos/a.jpg");

        let sent = legacy_authorization("s3.eu-central-1.amazonaws.com", &request.uri);
        let reference = legacy_authorization("photos.s3.amazonaws.com", "/a.jpg");
        assert_eq!(sent, reference);
    }

    #[test]
    fn test_ip_endpoint_keeps_bucket_in_path() {
        let client = client_at("127.0.0.1", Some(9000));
        let request = client.request(Method::PUT, "photos", Some("a.jpg"));
        assert_eq!(request.host, None);
        assert_eq!(request.uri, "/photos/a.jpg");
    }

    #[test]
    fn test_v4_signature_selects_header_scheme() {
        let client = client(true)
            .with_signature(ObjectSignature::V4)
            .with_region("eu-west-1");
        let request = client.request(Method::GET, "photos", Some("a.jpg"));
        assert_eq!(request.host, None);
        assert_eq!(request.uri, "/photos/a.jpg");
        assert!(matches!(
            request.scheme,
            Some(SigningScheme::HeaderV4 { ref region, .. }) if region == "eu-west-1"
        ));
    }

    #[test]
    fn test_presign_get_url_shape() {
        let url = client(false).presign_get("photos", "a.jpg", 3600).unwrap();
        assert!(url.starts_with("https://photos.s3.amazonaws.com/a.jpg?"), "{url}");
        assert!(url.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"), "{url}");
        assert!(url.contains("X-Amz-Expires=3600"), "{url}");
        assert!(url.contains("X-Amz-Signature="), "{url}");
    }

    #[test]
    fn test_presign_rejects_long_expiry() {
        let error = client(false)
            .presign_get("photos", "a.jpg", 604_801)
            .unwrap_err();
        assert!(matches!(error, RequestError::Sign(_)));
    }
}
