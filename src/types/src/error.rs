//! Error types for core primitives

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TypesError>;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    #[error("Invalid compact target: {0:#010x}")]
    InvalidCompact(u32),

    #[error("Block already sealed")]
    Sealed,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<Box<bincode::ErrorKind>> for TypesError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        TypesError::Serialization(err.to_string())
    }
}
