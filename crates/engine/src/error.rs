//! Error taxonomy for the per-(database, table) LSM engine.
//!
//! Mirrors the severity classes the node has to react to differently:
//! transient I/O is retried by the caller, corruption and capacity errors
//! here are the ones the engine surfaces explicitly so the node can refuse
//! further writes to the affected table while leaving others available.

use thiserror::Error;

/// Errors returned by [`crate::Engine`] operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The WAL append failed; the write was not durably recorded.
    #[error("wal write failed: {0}")]
    WalWriteFailed(#[from] wal::WalError),

    /// `put`/`delete` waited longer than the configured backpressure timeout
    /// for the immutable memtable queue to drain.
    #[error("backpressure timeout: immutable queue did not drain in time")]
    BackpressureTimeout,

    /// The table suffered interior corruption (a WAL CRC mismatch or a bad
    /// SSTable footer) and no longer accepts writes.
    #[error("table is unrecoverable and refuses writes until operator action")]
    UnrecoverableTable,

    /// A flush could not complete because the disk is full; the sealed
    /// memtable remains queued and will be retried.
    #[error("out of space while flushing to disk")]
    OutOfSpace,

    /// A mutation was attempted against a memtable that has already been
    /// sealed. Indicates a logic error in the caller.
    #[error("memtable is sealed")]
    Sealed,

    /// `key` was empty, or `key`/`value` exceeded the configured size limit.
    #[error("{0}")]
    InvalidInput(String),

    /// Any other I/O or SSTable-layer failure not covered above.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::OutOfMemory || e.raw_os_error() == Some(28) {
            // errno 28 == ENOSPC
            EngineError::OutOfSpace
        } else {
            EngineError::Other(e.into())
        }
    }
}

impl From<memtable::MemtableError> for EngineError {
    fn from(_: memtable::MemtableError) -> Self {
        EngineError::Sealed
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
