//! Error types for the level-set store

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No index entry for the requested identifier.
    #[error("Record not found")]
    NotFound,

    /// The index points at bytes that cannot be read back. Never folded
    /// into `NotFound`.
    #[error("Corrupt record in segment {segment} at offset {offset}: {reason}")]
    Corruption {
        segment: u32,
        offset: u64,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<Box<bincode::ErrorKind>> for StoreError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
