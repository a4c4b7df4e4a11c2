//! Collector error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] auditlog_storage::Error),

    #[error("record error: {0}")]
    Record(#[from] auditlog_core::Error),
}
