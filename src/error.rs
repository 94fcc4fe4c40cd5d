use thiserror::Error;

/// Main error type for quarry operations
#[derive(Error, Debug)]
pub enum QuarryError {
    #[error("Query syntax error: {0}")]
    QuerySyntax(String),

    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("Concurrent modification: another writer holds the index write lock")]
    ConcurrentModification,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Document not found: {0}")]
    DocumentNotFound(u64),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for quarry operations
pub type Result<T> = std::result::Result<T, QuarryError>;

impl QuarryError {
    pub(crate) fn syntax(msg: impl Into<String>) -> Self {
        QuarryError::QuerySyntax(msg.into())
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        QuarryError::IndexCorrupt(msg.into())
    }

    /// Check if this error indicates a transient failure that could be retried
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            QuarryError::ConcurrentModification | QuarryError::Io(_)
        )
    }
}
