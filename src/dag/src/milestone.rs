//! Milestones and chain-state snapshots
//!
//! A milestone is a vertex whose identifier clears the stricter milestone
//! proof-of-work target. It carries a [`Snapshot`]: the difficulty targets
//! for the next round, cumulative reward statistics, and the level set it
//! confirms. Milestone construction is a pure function of its inputs so
//! every node derives byte-identical chain state.

use crate::error::Result;
use crate::vertex::Vertex;
use lattice_types::difficulty::{
    block_compact_from_milestone, compact_to_target, next_compact, RetargetParams,
};
use lattice_types::{Block, BlockHeader, Hash256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Chain-wide state carried by a milestone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Compact target new ordinary blocks must beat.
    pub block_bits: u32,

    /// Stricter compact target a vertex must beat to become a milestone.
    pub milestone_bits: u32,

    /// Total issuance and fees confirmed up to this milestone.
    pub cumulative_reward: u64,

    /// Ordered vertices confirmed by this milestone, the milestone vertex
    /// itself last.
    pub level_set: Vec<Arc<Vertex>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    /// Identifier of the milestone vertex.
    pub hash: Hash256,

    pub height: u64,

    /// Previous milestone, by identifier only. History is owned by the
    /// store; in-memory milestones never chain live pointers backwards.
    pub prev: Hash256,

    /// Timestamp of the milestone block, the sole clock the next retarget
    /// consults.
    pub time: u64,

    pub snapshot: Snapshot,
}

/// The sole gate for promoting an ordinary vertex into a milestone: the
/// vertex identifier, read as a big-endian integer, must not exceed the
/// previous snapshot's milestone target. An undecodable target never
/// promotes.
pub fn check_milestone_pow(hash: &Hash256, previous: &Snapshot) -> bool {
    match compact_to_target(previous.milestone_bits) {
        Ok(target) => hash.meets_target(&target),
        Err(_) => false,
    }
}

impl Milestone {
    /// Construct the successor milestone. Pure: identical inputs yield a
    /// byte-identical result, with no clock consulted other than the
    /// candidate's embedded timestamp.
    pub fn create_next(
        prev: &Milestone,
        candidate: &Arc<Vertex>,
        level_set: Vec<Arc<Vertex>>,
        params: &RetargetParams,
    ) -> Result<Milestone> {
        let span = candidate.block.header.time.saturating_sub(prev.time);
        let milestone_bits = next_compact(prev.snapshot.milestone_bits, span, params);
        let block_bits = block_compact_from_milestone(milestone_bits, params);

        let confirmed_reward: u64 = level_set
            .iter()
            .map(|v| Vertex::block_reward(&v.block))
            .sum();

        // The sealed set owns vertices linked to their confirming
        // milestone; the candidate is its last element.
        let level_set = level_set
            .iter()
            .map(|v| Arc::new(v.with_milestone(candidate.hash)))
            .collect();

        Ok(Milestone {
            hash: candidate.hash,
            height: prev.height + 1,
            prev: prev.hash,
            time: candidate.block.header.time,
            snapshot: Snapshot {
                block_bits,
                milestone_bits,
                cumulative_reward: prev.snapshot.cumulative_reward + confirmed_reward,
                level_set,
            },
        })
    }

    /// The fixed starting milestone every node agrees on.
    pub fn genesis(params: &RetargetParams) -> Milestone {
        let mut block = Block::new(
            BlockHeader {
                version: 1,
                milestone_hash: Hash256::ZERO,
                prev_hash: Hash256::ZERO,
                tip_hash: Hash256::ZERO,
                merkle_root: Hash256::ZERO,
                time: 1_561_939_200, // 2019-07-01 00:00:00 UTC
                bits: params.pow_limit,
                nonce: 0,
            },
            Vec::new(),
        );
        let hash = block.seal().expect("genesis block seals");

        let vertex = Arc::new(Vertex {
            block: Arc::new(block),
            hash,
            height: 0,
            miner_chain_height: 0,
            cumulative_reward: 0,
            validity: Vec::new(),
            milestone: Some(hash),
        });

        Milestone {
            hash,
            height: 0,
            prev: Hash256::ZERO,
            time: vertex.block.header.time,
            snapshot: Snapshot {
                block_bits: params.pow_limit,
                milestone_bits: params.pow_limit,
                cumulative_reward: 0,
                level_set: vec![vertex],
            },
        }
    }
}
