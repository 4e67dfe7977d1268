//! Shared helpers for integration tests.

#![allow(clippy::unwrap_used)]

pub mod scripted;
pub mod socket_guard;

use std::sync::Arc;

use awsutils::engine::{EngineConfig, RequestEngine, RetryPolicy};
use awsutils::http::Destination;
use awsutils::s3::S3Client;
use awsutils::service::AwsErrorClassifier;
use awsutils::signer::{Credentials, Signer};

/// Engine pointed at a local plain-HTTP server, resending immediately.
#[allow(dead_code)]
pub fn local_engine(authority: &str, budget: u32) -> RequestEngine {
    let mut config = EngineConfig::new(Destination::parse(authority, false).unwrap());
    config.retry = RetryPolicy::immediate(budget);
    RequestEngine::new(config)
        .with_signer(Signer::new(Credentials::new("AKID", "SECRET")))
        .with_classifier(AwsErrorClassifier)
}

/// Path-style object client against a local server.
#[allow(dead_code)]
pub fn local_s3(authority: &str) -> S3Client {
    S3Client::new(Arc::new(local_engine(authority, 3))).with_path_style(true)
}

/// Authority of a wiremock server (`127.0.0.1:<port>`).
#[allow(dead_code)]
pub fn mock_authority(server: &wiremock::MockServer) -> String {
    server.address().to_string()
}

/// Deterministic test payload.
#[allow(dead_code)]
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Hex MD5 of `data`.
#[allow(dead_code)]
pub fn md5_hex(data: &[u8]) -> String {
    use md5::{Digest, Md5};
    hex::encode(Md5::digest(data))
}
