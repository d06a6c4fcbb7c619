//! Core error types.

use crate::catalog::ParseError;
use thiserror::Error;

/// Store-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying SQLite error.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored definition could not be parsed.
    #[error("definition parse error: {0}")]
    Parse(#[from] ParseError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transaction control error.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
