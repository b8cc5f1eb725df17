//! Error types for the storage engine.

use crate::types::PageId;
use thiserror::Error;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage engine.
///
/// Variants map onto the error taxonomy: io, not-found, already-exists,
/// corrupt-log, resource-exhausted, internal, plus invalid-argument for the
/// facade's reserved-key rejection.
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying file system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page was not found in the database file.
    #[error("page {0} not found")]
    PageNotFound(PageId),

    /// Key absent on `get`/`delete`, or database files absent on `open`
    /// without `create_if_not_exists`.
    #[error("key not found")]
    NotFound,

    /// `open` was called with `error_if_exists` against an existing database.
    #[error("database already exists at {0}")]
    AlreadyExists(String),

    /// Log record header names an unknown kind, an inconsistent size, or the
    /// log file ends mid-record.
    #[error("corrupt log: {0}")]
    CorruptLog(String),

    /// The buffer pool has no evictable frame (every frame is pinned).
    #[error("buffer pool exhausted: no evictable frame")]
    ResourceExhausted,

    /// An invariant was violated; a bug, not a recoverable condition.
    #[error("internal invariant violation: {0}")]
    Internal(String),

    /// A caller passed a value the facade rejects outright, such as a
    /// reserved key.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Database file magic/type tag did not match what was expected.
    #[error("invalid database file: {0}")]
    InvalidDatabaseFile(String),
}

impl StorageError {
    /// Build a `CorruptLog` error with a message.
    pub fn corrupt_log(msg: impl Into<String>) -> Self {
        Self::CorruptLog(msg.into())
    }

    /// Build an `Internal` error with a message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Build an `InvalidArgument` error with a message.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Build an `InvalidDatabaseFile` error with a message.
    pub fn invalid_db(msg: impl Into<String>) -> Self {
        Self::InvalidDatabaseFile(msg.into())
    }
}
