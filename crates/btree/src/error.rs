use thiserror::Error;

/// Errors raised while loading a persisted [`crate::BTreeIndex`].
///
/// Distinguished per the "exception-driven control flow" design note: a
/// missing file is a legitimate fresh start and rebuilds silently, while a
/// corrupt file is an operator-visible event even though the index is
/// always safely rebuildable from the row store.
#[derive(Debug, Error)]
pub enum IndexLoadError {
    /// No persisted copy of this index exists yet.
    #[error("index file does not exist")]
    Missing,

    /// The persisted copy failed a CRC or magic check.
    #[error("index file is corrupt: {0}")]
    Corrupt(String),

    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<blob::BlobError> for IndexLoadError {
    fn from(e: blob::BlobError) -> Self {
        match e {
            blob::BlobError::Missing => IndexLoadError::Missing,
            blob::BlobError::Corrupt(msg) => IndexLoadError::Corrupt(msg),
            blob::BlobError::Io(io) => IndexLoadError::Io(io),
        }
    }
}
