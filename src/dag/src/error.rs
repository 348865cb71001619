//! Error types for the DAG module

use lattice_types::Hash256;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DagError>;

#[derive(Debug, Error)]
pub enum DagError {
    /// Fails basic structural checks. Rejected, never retried.
    #[error("Malformed block: {0}")]
    Malformed(String),

    /// Block hash does not beat the current block target.
    #[error("Insufficient work: {hash} vs target bits {bits:#010x}")]
    InsufficientWork { hash: Hash256, bits: u32 },

    /// Referenced ancestor is unknown and the orphan pool cannot hold
    /// the block.
    #[error("Unknown ancestor {0} and orphan pool is full")]
    OrphanPoolFull(Hash256),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Type error: {0}")]
    Types(#[from] lattice_types::TypesError),
}
