//! # Lattice Core Types
//!
//! Shared primitives for the lattice ledger:
//!
//! - **Hash256**: fixed-width identifier used for block hashes and addresses
//! - **Block**: DAG block header + transaction payload with a sealing phase
//! - **Transaction**: input/output transfer with a pluggable signature scheme
//! - **Difficulty**: compact target encoding and the milestone retarget rule

pub mod block;
pub mod difficulty;
pub mod error;
pub mod hash;
pub mod transaction;

pub use block::{Block, BlockHeader};
pub use difficulty::{compact_to_target, target_to_compact, RetargetParams};
pub use error::{Result, TypesError};
pub use hash::Hash256;
pub use transaction::{Ed25519Scheme, SignatureScheme, Transaction, TxInput, TxOutput};
