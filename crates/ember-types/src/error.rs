use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid object identifier: {0:?}")]
    InvalidId(String),

    #[error("entropy source unavailable: {0}")]
    Entropy(String),
}
