//! Hand-built client for S3-style object storage and query APIs.
//!
//! Requests go through a small HTTP/1.1 stack with per-destination
//! connection reuse, per-call request signing, streaming markup decoding and
//! bounded retries and redirects. On top of that sit object-storage
//! operations and resumable transfers.
//!
//! # Architecture
//!
//! - [`signer`] - credentials, signing schemes and query canonicalization
//! - [`decoder`] - streaming decoder for structured response bodies
//! - [`http`] - destinations, TLS, the connection pool and the wire codec
//! - [`engine`] - the request state machine, sinks and body sources
//! - [`service`] - service error codes, the default classifier and query calls
//! - [`s3`] - object and multipart operations, presigned URLs
//! - [`transfer`] - multipart uploads and resumable downloads
//! - [`config`] - file and environment configuration
//!
//! Data flows one way: `transfer` uses `s3`, which uses `engine`, which
//! uses `signer`, `http` and `decoder`.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod decoder;
pub mod engine;
pub mod http;
pub mod s3;
pub mod service;
pub mod signer;
pub mod transfer;
mod user_agent;

// Re-export commonly used types
pub use config::{ClientConfig, ConfigError};
pub use engine::{Body, BodySink, Request, RequestEngine, RequestError, RequestOptions, Response};
pub use s3::{ByteRange, S3Client};
pub use service::{QueryClient, ServiceError};
pub use signer::{Credentials, Signer, SigningScheme};
pub use transfer::{ResumableTransfer, TransferError};
