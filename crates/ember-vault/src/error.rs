use ember_store::StoreError;

/// Errors surfaced by the lifecycle manager.
///
/// Every variant is returned only after the operation has cleaned up after
/// itself: no staging file or double-servable burn object is left behind.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The payload exceeded the configured size bound.
    #[error("payload exceeds the {limit}-byte limit")]
    TooLarge { limit: u64 },

    /// Unknown, expired, already burned, or malformed identifier. These
    /// cases are deliberately indistinguishable.
    #[error("object not found")]
    NotFound,

    /// The upload stream failed or the payload could not be written.
    #[error("ingestion failed: {0}")]
    IngestFailed(String),

    /// The backing medium could not be used.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A configuration value is out of range.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound,
            StoreError::AlreadyExists(id) => Self::Internal(format!("identifier collision on {id}")),
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StoreError::Io(e) => Self::StoreUnavailable(e.to_string()),
        }
    }
}

/// Result alias for lifecycle operations.
pub type VaultResult<T> = Result<T, VaultError>;
