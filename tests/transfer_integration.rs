//! Integration tests for multipart uploads and resumable downloads.

mod support;

use std::io::Cursor;

use awsutils::engine::{BodySink, RequestError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use awsutils::s3::ByteRange;
use awsutils::transfer::{MIN_PART_SIZE, ResumableTransfer, TransferError};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

use support::scripted::{Reply, full_response, scripted_server_or_skip, truncated_response};
use support::socket_guard::start_mock_server_or_skip;
use support::{local_s3, md5_hex, mock_authority, payload};

const XML: &str = "application/xml";
const UPLOAD_ID: &str = "U-1";

/// Answers part uploads with the MD5 of what was received, optionally of a
/// copy with its first byte flipped.
struct PartEtag {
    corrupt: bool,
}

impl Respond for PartEtag {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let mut body = request.body.clone();
        if self.corrupt && !body.is_empty() {
            body[0] ^= 0xff;
        }
        ResponseTemplate::new(200).insert_header("ETag", format!("\"{}\"", md5_hex(&body)))
    }
}

async fn mount_multipart(server: &MockServer, corrupt: bool) {
    Mock::given(method("POST"))
        .and(path("/bucket/big.bin"))
        .and(query_param("uploads", ""))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!(
                "<InitiateMultipartUploadResult><Bucket>bucket</Bucket><Key>big.bin</Key>\
                 <UploadId>{UPLOAD_ID}</UploadId></InitiateMultipartUploadResult>"
            ),
            XML,
        ))
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/bucket/big.bin"))
        .and(query_param("uploadId", UPLOAD_ID))
        .respond_with(PartEtag { corrupt })
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/bucket/big.bin"))
        .and(query_param("uploadId", UPLOAD_ID))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<CompleteMultipartUploadResult><Bucket>bucket</Bucket><Key>big.bin</Key>\
             <ETag>\"abc-3\"</ETag></CompleteMultipartUploadResult>",
            XML,
        ))
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/bucket/big.bin"))
        .and(query_param("uploadId", UPLOAD_ID))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
}

async fn requests_with_method(server: &MockServer, verb: &str) -> Vec<wiremock::Request> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.method.as_str() == verb)
        .collect()
}

fn transfer(server: &MockServer, verify: bool) -> ResumableTransfer {
    ResumableTransfer::new(local_s3(&mock_authority(server))).with_verify(verify)
}

// ==================== Upload Tests ====================

#[tokio::test]
async fn test_upload_of_two_and_a_half_chunks_sends_three_parts() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_multipart(&server, false).await;
    let data = payload(usize::try_from(MIN_PART_SIZE * 5 / 2).unwrap());

    let outcome = transfer(&server, true)
        .upload("bucket", "big.bin", Cursor::new(data.clone()), 0, None)
        .await
        .unwrap();

    assert_eq!(outcome.parts, 3);
    assert_eq!(outcome.size, data.len() as u64);
    assert_eq!(outcome.etag, "abc-3");

    let parts = requests_with_method(&server, "PUT").await;
    let numbers: Vec<String> = parts
        .iter()
        .map(|part| {
            part.url
                .query_pairs()
                .find(|(key, _)| key == "partNumber")
                .unwrap()
                .1
                .into_owned()
        })
        .collect();
    assert_eq!(numbers, ["1", "2", "3"]);
    let sizes: Vec<usize> = parts.iter().map(|part| part.body.len()).collect();
    let chunk = usize::try_from(MIN_PART_SIZE).unwrap();
    assert_eq!(sizes, [chunk, chunk, chunk / 2]);
    let joined: Vec<u8> = parts.iter().flat_map(|part| part.body.clone()).collect();
    assert_eq!(joined, data, "parts reassemble the source");

    let complete = &requests_with_method(&server, "POST").await[1];
    let body = String::from_utf8_lossy(&complete.body);
    assert_eq!(body.matches("<Part>").count(), 3);
    assert!(body.contains("<PartNumber>3</PartNumber>"));
    assert!(requests_with_method(&server, "DELETE").await.is_empty());
}

#[tokio::test]
async fn test_failed_part_aborts_upload() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("PUT"))
        .and(query_param("partNumber", "2"))
        .respond_with(ResponseTemplate::new(500).set_body_bytes(b"boom".to_vec()))
        .mount(&server)
        .await;
    mount_multipart(&server, false).await;
    let data = payload(usize::try_from(MIN_PART_SIZE * 5 / 2).unwrap());

    let error = transfer(&server, false)
        .upload("bucket", "big.bin", Cursor::new(data), 0, None)
        .await
        .unwrap_err();

    assert!(
        matches!(error, TransferError::Request(RequestError::Status { .. })),
        "{error:?}"
    );
    let aborts = requests_with_method(&server, "DELETE").await;
    assert_eq!(aborts.len(), 1, "initiated upload must be aborted");
    assert_eq!(
        requests_with_method(&server, "POST").await.len(),
        1,
        "completion never attempted"
    );
}

#[tokio::test]
async fn test_corrupted_part_fails_when_verifying() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_multipart(&server, true).await;
    let data = payload(usize::try_from(MIN_PART_SIZE * 2).unwrap());

    let error = transfer(&server, true)
        .upload("bucket", "big.bin", Cursor::new(data), 0, None)
        .await
        .unwrap_err();

    assert!(
        matches!(error, TransferError::Request(RequestError::Integrity { .. })),
        "{error:?}"
    );
    assert_eq!(requests_with_method(&server, "PUT").await.len(), 1, "stops at first part");
    assert_eq!(requests_with_method(&server, "DELETE").await.len(), 1);
}

#[tokio::test]
async fn test_corrupted_part_accepted_without_verification() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_multipart(&server, true).await;
    let data = payload(usize::try_from(MIN_PART_SIZE * 2).unwrap());

    let outcome = transfer(&server, false)
        .upload("bucket", "big.bin", Cursor::new(data), 0, None)
        .await
        .unwrap();

    assert_eq!(outcome.parts, 2);
    assert!(requests_with_method(&server, "DELETE").await.is_empty());
}

#[tokio::test]
async fn test_small_source_uses_single_put() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("PUT"))
        .and(path("/bucket/small.txt"))
        .respond_with(PartEtag { corrupt: false })
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("small.txt");
    std::fs::write(&file, b"0123456789abcdef").unwrap();

    let outcome = transfer(&server, true)
        .upload_file("bucket", "small.txt", &file)
        .await
        .unwrap();

    assert_eq!(outcome.parts, 0);
    assert_eq!(outcome.etag, md5_hex(b"0123456789abcdef"));
    let puts = requests_with_method(&server, "PUT").await;
    assert_eq!(puts.len(), 1);
    assert!(puts[0].url.query().is_none());
    assert_eq!(puts[0].body, b"0123456789abcdef");
    let content_md5 = puts[0].headers.get("content-md5").unwrap().to_str().unwrap();
    assert_eq!(
        hex::encode(BASE64.decode(content_md5).unwrap()),
        md5_hex(b"0123456789abcdef")
    );
}

#[tokio::test]
async fn test_single_put_accepts_uppercase_etag() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let data = b"uppercase etag".to_vec();
    Mock::given(method("PUT"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", format!("\"{}\"", md5_hex(&data).to_uppercase())),
        )
        .mount(&server)
        .await;

    let outcome = transfer(&server, true)
        .upload("bucket", "k", Cursor::new(data), 0, None)
        .await
        .unwrap();

    assert_eq!(outcome.parts, 0);
}

#[tokio::test]
async fn test_single_put_etag_mismatch_is_integrity_error() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("PUT"))
        .respond_with(PartEtag { corrupt: true })
        .mount(&server)
        .await;

    let error = transfer(&server, true)
        .upload("bucket", "k", Cursor::new(b"payload".to_vec()), 0, None)
        .await
        .unwrap_err();

    assert!(
        matches!(error, TransferError::Request(RequestError::Integrity { .. })),
        "{error:?}"
    );
}

#[tokio::test]
async fn test_single_put_without_verify_sends_no_digest() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("PUT"))
        .respond_with(PartEtag { corrupt: true })
        .mount(&server)
        .await;

    transfer(&server, false)
        .upload("bucket", "k", Cursor::new(b"payload".to_vec()), 0, None)
        .await
        .unwrap();

    let puts = requests_with_method(&server, "PUT").await;
    assert!(puts[0].headers.get("content-md5").is_none());
}

#[tokio::test]
async fn test_upload_window_sends_only_its_bytes() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("PUT"))
        .respond_with(PartEtag { corrupt: false })
        .mount(&server)
        .await;

    transfer(&server, true)
        .upload("bucket", "slice", Cursor::new(b"headBODYtail".to_vec()), 4, Some(8))
        .await
        .unwrap();

    let puts = requests_with_method(&server, "PUT").await;
    assert_eq!(puts[0].body, b"BODY");
}

#[tokio::test]
async fn test_abort_pending_uploads_follows_markers_across_pages() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let page = |uploads: &[(&str, &str)], next: Option<(&str, &str)>| {
        let mut body = String::from("<ListMultipartUploadsResult><Bucket>bucket</Bucket>");
        match next {
            Some((key, id)) => body.push_str(&format!(
                "<IsTruncated>true</IsTruncated><NextKeyMarker>{key}</NextKeyMarker>\
                 <NextUploadIdMarker>{id}</NextUploadIdMarker>"
            )),
            None => body.push_str("<IsTruncated>false</IsTruncated>"),
        }
        for (key, id) in uploads {
            body.push_str(&format!(
                "<Upload><Key>{key}</Key><UploadId>{id}</UploadId></Upload>"
            ));
        }
        body.push_str("</ListMultipartUploadsResult>");
        ResponseTemplate::new(200).set_body_raw(body, XML)
    };
    Mock::given(method("GET"))
        .and(path("/bucket/"))
        .and(query_param("uploads", ""))
        .and(query_param_is_missing("key-marker"))
        .respond_with(page(&[("logs/a", "u1"), ("logs/b", "u2")], Some(("logs/b", "u2"))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bucket/"))
        .and(query_param("key-marker", "logs/b"))
        .and(query_param("upload-id-marker", "u2"))
        .respond_with(page(&[("logs/c", "u3")], Some(("logs/c", "u3"))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bucket/"))
        .and(query_param("key-marker", "logs/c"))
        .and(query_param("upload-id-marker", "u3"))
        .respond_with(page(&[("logs/d", "u4")], None))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let aborted = local_s3(&mock_authority(&server))
        .abort_pending_uploads("bucket", Some("logs/"))
        .await
        .unwrap();

    assert_eq!(aborted, 4);
    let listings = requests_with_method(&server, "GET").await;
    assert_eq!(listings.len(), 3);
    assert!(listings.iter().all(|request| request
        .url
        .query_pairs()
        .any(|(name, value)| name == "prefix" && value == "logs/")));
    let aborted_ids: Vec<String> = requests_with_method(&server, "DELETE")
        .await
        .iter()
        .filter_map(|request| {
            request
                .url
                .query_pairs()
                .find(|(name, _)| name == "uploadId")
                .map(|(_, value)| value.into_owned())
        })
        .collect();
    assert_eq!(aborted_ids, vec!["u1", "u2", "u3", "u4"]);
}

// ==================== Download Tests ====================

fn head_with_etag(status: &str, etag: &str) -> String {
    format!("HTTP/1.1 {status}\r\nETag: \"{etag}\"")
}

#[tokio::test]
async fn test_interrupted_download_resumes_where_it_stopped() {
    let body = payload(1000);
    let etag = md5_hex(&body);
    let rest = format!(
        "HTTP/1.1 206 Partial Content\r\nETag: \"{etag}\"\r\nContent-Range: bytes 400-999/1000"
    );
    let Some(server) = scripted_server_or_skip(vec![
        Reply::SendAndClose(truncated_response(&head_with_etag("200 OK", &etag), &body, 400)),
        Reply::Send(full_response(&rest, &body[400..])),
    ])
    .await
    else {
        return;
    };
    let transfer = ResumableTransfer::new(local_s3(&server.authority())).with_verify(true);

    let outcome = transfer.download("bucket", "key", None, None).await.unwrap();

    let requests = server.requests();
    assert_eq!(requests[0].header("range"), None);
    assert_eq!(requests[1].header("range"), Some("bytes=400-"));
    assert_eq!(outcome.resumes, 1);
    assert!(outcome.verified);
    assert_eq!(outcome.range.downloaded, 1000);
    assert_eq!(outcome.sink.into_bytes().unwrap(), body, "identical to an uninterrupted read");
}

#[tokio::test]
async fn test_resume_answered_in_full_starts_over() {
    let body = payload(800);
    let etag = md5_hex(&body);
    let Some(server) = scripted_server_or_skip(vec![
        Reply::SendAndClose(truncated_response(&head_with_etag("200 OK", &etag), &body, 300)),
        Reply::Send(full_response(&head_with_etag("200 OK", &etag), &body)),
    ])
    .await
    else {
        return;
    };
    let transfer = ResumableTransfer::new(local_s3(&server.authority())).with_verify(true);

    let outcome = transfer.download("bucket", "key", None, None).await.unwrap();

    assert!(outcome.verified, "hash restarted with the sink");
    assert_eq!(outcome.range.downloaded, 800);
    assert_eq!(outcome.sink.into_bytes().unwrap(), body);
}

#[tokio::test]
async fn test_resume_into_file_sink() {
    let body = payload(5000);
    let Some(server) = scripted_server_or_skip(vec![
        Reply::SendAndClose(truncated_response("HTTP/1.1 200 OK", &body, 1234)),
        Reply::SendAndClose(truncated_response(
            "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 1234-4999/5000",
            &body[1234..],
            1000,
        )),
        Reply::Send(full_response(
            "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 2234-4999/5000",
            &body[2234..],
        )),
    ])
    .await
    else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("out.bin");
    let file = tokio::fs::File::create(&target).await.unwrap();
    let transfer = ResumableTransfer::new(local_s3(&server.authority()));

    let outcome = transfer
        .download("bucket", "key", None, Some(BodySink::custom(file)))
        .await
        .unwrap();
    assert_eq!(outcome.resumes, 2);
    drop(outcome);

    assert_eq!(server.requests()[2].header("range"), Some("bytes=2234-"));
    assert_eq!(std::fs::read(&target).unwrap(), body);
}

#[tokio::test]
async fn test_download_checksum_mismatch_is_fatal() {
    let body = payload(100);
    let Some(server) = scripted_server_or_skip(vec![Reply::Send(full_response(
        &head_with_etag("200 OK", &md5_hex(b"something else")),
        &body,
    ))])
    .await
    else {
        return;
    };
    let transfer = ResumableTransfer::new(local_s3(&server.authority())).with_verify(true);

    let error = transfer.download("bucket", "key", None, None).await.unwrap_err();

    assert!(
        matches!(error, TransferError::Request(RequestError::Integrity { .. })),
        "{error:?}"
    );
}

#[tokio::test]
async fn test_ranged_download_is_never_verified() {
    let Some(server) = scripted_server_or_skip(vec![Reply::Send(full_response(
        "HTTP/1.1 206 Partial Content\r\nETag: \"0123456789abcdef0123456789abcdef\"\r\n\
         Content-Range: bytes 10-19/100",
        b"0123456789",
    ))])
    .await
    else {
        return;
    };
    let transfer = ResumableTransfer::new(local_s3(&server.authority())).with_verify(true);

    let outcome = transfer
        .download("bucket", "key", Some(ByteRange::new(10, 19)), None)
        .await
        .unwrap();

    assert!(!outcome.verified);
    assert_eq!(outcome.range.start, 10);
    assert_eq!(outcome.sink.into_bytes().unwrap(), b"0123456789");
}

#[tokio::test]
async fn test_multipart_etag_skips_verification() {
    let body = payload(64);
    let Some(server) = scripted_server_or_skip(vec![Reply::Send(full_response(
        &head_with_etag("200 OK", "d41d8cd98f00b204e9800998ecf8427e-2"),
        &body,
    ))])
    .await
    else {
        return;
    };
    let transfer = ResumableTransfer::new(local_s3(&server.authority())).with_verify(true);

    let outcome = transfer.download("bucket", "key", None, None).await.unwrap();

    assert!(!outcome.verified);
    assert_eq!(outcome.sink.into_bytes().unwrap(), body);
}
