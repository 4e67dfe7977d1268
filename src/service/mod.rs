//! Service error taxonomy and the query-protocol client.
//!
//! [`ErrorCode`] is a static table of the error codes object storage,
//! queues and the attribute store return. [`AwsErrorClassifier`] plugs it
//! into the engine so transient codes are retried and the rest surface as
//! [`ServiceError`].

mod classifier;
mod codes;
mod error;
mod query;

pub use classifier::AwsErrorClassifier;
pub use codes::ErrorCode;
pub use error::ServiceError;
pub use query::{QueryClient, QuerySignature};
