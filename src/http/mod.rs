//! Hand-built HTTP/1.1 transport.
//!
//! This module provides the pieces the request engine drives directly:
//!
//! - [`Destination`] - host, port and TLS flag of a connection slot
//! - [`ConnectionPool`] - one idle connection per destination, probed before reuse
//! - [`ResponseHead`] / [`ResponseBody`] - response parsing and body framing

pub mod constants;
mod destination;
mod pool;
mod tls;
mod wire;

pub use destination::{Destination, InvalidDestination};
pub use pool::{Connection, ConnectionPool, Stream};
pub use wire::{Framing, ResponseBody, ResponseHead};

pub(crate) use wire::{encode_head, read_head};
