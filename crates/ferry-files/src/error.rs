//! Error types for upload storage.

use thiserror::Error;

/// Upload storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying filesystem failure
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Name cannot be used as part of a stored file name
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),
}

/// Result alias for storage operations
pub type Result<T> = std::result::Result<T, StoreError>;
