use thiserror::Error;

/// Errors surfaced by the row/table glue layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("engine error: {0}")]
    Engine(#[from] engine::EngineError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),

    #[error("row payload is not valid JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("no such row: {0}")]
    RowNotFound(uuid::Uuid),

    #[error("no such table: {0}/{1}")]
    TableNotFound(String, String),

    #[error("table {0}/{1} already exists")]
    TableAlreadyExists(String, String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
