//! Structured response bodies.
//!
//! [`StreamingDecoder`] turns chunked markup into a [`StructuredValue`]
//! tree, collapsing single child tags to bare values.

mod streaming;
mod value;

pub use streaming::{DecodeError, StreamingDecoder, decode};
pub use value::StructuredValue;
