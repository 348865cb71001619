//! On-disk records and location descriptors

use lattice_dag::{Milestone, TxValidity, Vertex};
use lattice_types::{Block, Hash256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Serialized-for-storage projection of a vertex. Created at persistence
/// time, immutable thereafter; read back to reconstruct vertices on
/// demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub hash: Hash256,
    pub height: u64,
    pub miner_chain_height: u64,
    pub cumulative_reward: u64,
    pub validity: Vec<TxValidity>,
    /// Confirming milestone. Consecutive records sharing this value form
    /// one level set, milestone vertex last.
    pub milestone: Hash256,
    pub block: Block,
}

impl NodeRecord {
    pub fn from_vertex(vertex: &Vertex, milestone: &Milestone) -> NodeRecord {
        NodeRecord {
            hash: vertex.hash,
            height: vertex.height,
            miner_chain_height: vertex.miner_chain_height,
            cumulative_reward: vertex.cumulative_reward,
            validity: vertex.validity.clone(),
            milestone: milestone.hash,
            block: (*vertex.block).clone(),
        }
    }

    pub fn into_vertex(self) -> Vertex {
        Vertex {
            hash: self.hash,
            height: self.height,
            miner_chain_height: self.miner_chain_height,
            cumulative_reward: self.cumulative_reward,
            validity: self.validity,
            milestone: Some(self.milestone),
            block: Arc::new(self.block),
        }
    }
}

/// Position of a record inside the segment log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLocation {
    pub segment: u32,
    pub offset: u64,
}

/// Where a block lives: resident in memory or at a position in the log —
/// never both.
#[derive(Debug, Clone)]
pub enum BlockLocation {
    Memory(Arc<Block>),
    Disk(RecordLocation),
}
