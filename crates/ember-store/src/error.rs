use ember_types::ObjectId;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No committed object with this id (or it was already taken).
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// A committed object already uses this id.
    #[error("object already exists: {0}")]
    AlreadyExists(ObjectId),

    /// The backing medium could not be opened (disk full, permissions, ...).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
