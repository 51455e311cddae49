use thiserror::Error;

/// Errors surfaced by the top-level node handle.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A write (or, optionally, a read) was attempted before recovery
    /// completed for every table: until every table finishes recovery the
    /// node reports `online=false` and rejects writes.
    #[error("node is not yet online (recovery in progress)")]
    NotOnline,

    #[error("no such database: {0}")]
    NoSuchDatabase(String),

    #[error("no such table: {0}/{1}")]
    NoSuchTable(String, String),

    /// Recovery detected corruption in this table's WAL or SSTables; the
    /// table refuses writes until an operator intervenes, but the rest of
    /// the node remains available.
    #[error("table {0}/{1} is unrecoverable (corruption detected during recovery)")]
    UnrecoverableTable(String, String),

    #[error(transparent)]
    Storage(#[from] storage::StorageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
