use thiserror::Error;

/// Errors surfaced while loading a persisted replica map. Mirrors
/// `btree::IndexLoadError` so callers in `node`'s recovery orchestration can
/// treat every subsystem's "load" step the same way: a missing file means a
/// fresh table, a corrupt one means an operator-visible problem.
#[derive(Debug, Error)]
pub enum ReplicaLoadError {
    #[error("no persisted replica map found")]
    Missing,
    #[error("replica map file is corrupt: {0}")]
    Corrupt(String),
    #[error("I/O error loading replica map: {0}")]
    Io(#[from] std::io::Error),
}

impl From<blob::BlobError> for ReplicaLoadError {
    fn from(e: blob::BlobError) -> Self {
        match e {
            blob::BlobError::Missing => Self::Missing,
            blob::BlobError::Corrupt(msg) => Self::Corrupt(msg),
            blob::BlobError::Io(e) => Self::Io(e),
        }
    }
}
