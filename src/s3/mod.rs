//! Object-storage operations.
//!
//! Buckets with DNS-compatible names are addressed as `bucket.endpoint`;
//! other names, or every name when path style is forced, go in the path.
//! Requests are signed with the legacy REST signature unless V4 is chosen.

mod addressing;
mod client;
mod types;

pub use addressing::is_dns_compatible;
pub use client::{DEFAULT_REGION, S3Client};
pub use types::{ByteRange, MultipartListing, ObjectHead, ObjectSignature, PendingUpload};
