//! Storage error types
//!
//! Defines all errors that can occur in the storage layer.

use thiserror::Error;

/// Errors that can occur in the event store and its backends
#[derive(Error, Debug)]
pub enum StorageError {
    /// A stored or transmitted record could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// The backing store is unreachable, or a subscription broke
    #[error("Connection error: {0}")]
    Connection(String),

    /// Event key is empty or uses characters outside `[A-Za-z0-9_.]`
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization of a log entry failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (checksum mismatch)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Commit log format or recovery error
    #[error("WAL error: {0}")]
    WalError(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
