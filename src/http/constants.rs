//! Constants for the HTTP transport (timeouts, I/O granularity).

/// Default connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default per-read receive timeout (30 seconds).
pub const RECEIVE_TIMEOUT_SECS: u64 = 30;

/// Size of each body read and of the connection read buffer (32 KiB).
pub const READ_CHUNK_SIZE: usize = 32 * 1024;

/// Bytes of an unwanted or unframed body kept for error reports (1 KiB).
pub const ERROR_PEEK_SIZE: usize = 1024;

/// Longest accepted status or header line (16 KiB).
pub const MAX_LINE_BYTES: usize = 16 * 1024;

/// Most header lines accepted in one response head.
pub const MAX_HEADERS: usize = 128;
