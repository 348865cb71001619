//! # Lattice DAG Module
//!
//! Consensus engine for the block lattice: vertex admission, milestone
//! promotion, and confirmation event publishing.
//!
//! ## Module Structure
//!
//! ```text
//! dag/
//! ├── vertex.rs     - Vertex metadata and structural validation
//! ├── milestone.rs  - Snapshot state and milestone construction
//! └── manager.rs    - Admission pipeline, orphan pool, event channel
//! ```
//!
//! The admission path is the single serialization point for the ledger:
//! one candidate is decided at a time, which is what preserves the
//! height and difficulty-target invariants without cross-node locks.

pub mod error;
pub mod manager;
pub mod milestone;
pub mod vertex;

pub use error::{DagError, Result};
pub use manager::{Admission, DagManager, DagParams, LevelSetConfirmed, LevelSetPersistence};
pub use milestone::{check_milestone_pow, Milestone, Snapshot};
pub use vertex::{TxValidity, Vertex};
