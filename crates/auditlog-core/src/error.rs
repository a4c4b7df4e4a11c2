//! Error types for record encoding and decoding.
//!
//! Decode errors distinguish a corrupted header (bad signature, version or
//! field count) from a record whose declared lengths run past the buffer.
//! Scanners treat the first kind as "stop reading this file" and the second
//! as "file truncated mid-record"; both end the scan for that file.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid record signature")]
    InvalidSignature,

    #[error("unsupported record version: {0}")]
    UnsupportedVersion(u16),

    #[error("invalid field count: {0}")]
    InvalidFieldCount(u16),

    #[error("truncated record: expected {expected} bytes, got {actual}")]
    TruncatedRecord { expected: usize, actual: usize },

    #[error("invalid string field {0}")]
    InvalidField(usize),

    #[error("invalid audit kind: {0}")]
    InvalidKind(u32),

    #[error("invalid audit result: {0}")]
    InvalidResult(u32),
}
