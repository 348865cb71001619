//! # Lattice Level-Set Store
//!
//! Durable, append-only storage for confirmed level sets (the
//! "caterpillar": the chain crawls forward one sealed segment at a time).
//!
//! Layout on disk: numbered segment files of length-prefixed records, one
//! record per vertex, level sets contiguous; plus an index file mapping
//! identifier to (segment, offset). The index is a cache — deleting it
//! loses nothing, it is rebuilt by replaying the log.

pub mod error;
pub mod record;
pub mod segment;
pub mod store;

pub use error::{Result, StoreError};
pub use record::{BlockLocation, NodeRecord, RecordLocation};
pub use store::{LevelSetStore, StoreConfig};
