//! DAG vertices
//!
//! A vertex wraps a sealed block together with the consensus metadata the
//! admission pipeline derives for it: milestone-relative height, the
//! miner's own chain height, cumulative reward, and per-transaction
//! validity flags.

use crate::error::{DagError, Result};
use lattice_types::transaction::OutPoint;
use lattice_types::{Block, Hash256, SignatureScheme};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Per-transaction validity, defaulting to `Unknown` until checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxValidity {
    Valid,
    Invalid,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vertex {
    /// Sealed block, shared with caches and the relay queue.
    pub block: Arc<Block>,

    /// Identifying hash of the sealed block.
    pub hash: Hash256,

    /// Height of the milestone that confirms (or will confirm) this
    /// vertex.
    pub height: u64,

    /// Number of blocks along this miner's previous-block chain.
    pub miner_chain_height: u64,

    /// Coin issuance and fees accumulated up to and including this vertex.
    pub cumulative_reward: u64,

    /// One flag per transaction in the block.
    pub validity: Vec<TxValidity>,

    /// Identifier of the confirming milestone, set when the level set is
    /// sealed. A back-reference by identifier, resolved through the store.
    pub milestone: Option<Hash256>,
}

impl Vertex {
    /// Copy of this vertex linked to its confirming milestone.
    pub fn with_milestone(&self, milestone: Hash256) -> Vertex {
        let mut v = self.clone();
        v.milestone = Some(milestone);
        v
    }

    /// Sum of issuance outputs and fees carried by this block.
    pub fn block_reward(block: &Block) -> u64 {
        block
            .transactions()
            .iter()
            .map(|tx| {
                if tx.is_issuance() {
                    tx.total_output()
                } else {
                    tx.fee
                }
            })
            .sum()
    }
}

/// Structural validation performed at admission time: the merkle
/// invariant, signatures, and double spends within the in-progress level
/// set. A block that fails any of these is rejected outright, never
/// admitted with `Invalid` flags.
///
/// Returns one `Valid` flag per transaction; the returned vector length
/// always equals the block's transaction count.
pub fn check_structure(
    block: &Block,
    scheme: &dyn SignatureScheme,
    spent_in_level_set: &HashSet<OutPoint>,
) -> Result<Vec<TxValidity>> {
    if !block.verify_merkle_root()? {
        return Err(DagError::Malformed(
            "transaction payload hash mismatch".into(),
        ));
    }

    let mut spent = HashSet::new();
    for (i, tx) in block.transactions().iter().enumerate() {
        if tx.outputs.is_empty() {
            return Err(DagError::Malformed(format!("tx {i} has no outputs")));
        }

        if tx.is_issuance() {
            continue;
        }

        let msg = tx.signing_bytes()?;
        for (j, input) in tx.inputs.iter().enumerate() {
            if !scheme.verify(&input.pubkey, &msg, &input.signature) {
                return Err(DagError::Malformed(format!(
                    "tx {i} input {j}: bad signature"
                )));
            }
            if !spent.insert(input.outpoint.clone())
                || spent_in_level_set.contains(&input.outpoint)
            {
                return Err(DagError::Malformed(format!(
                    "tx {i} input {j}: double spend of {}:{}",
                    input.outpoint.txid, input.outpoint.index
                )));
            }
        }
    }

    Ok(vec![TxValidity::Valid; block.transaction_count()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::transaction::{TxInput, TxOutput};
    use lattice_types::{BlockHeader, Ed25519Scheme, Transaction};

    fn sealed_block(txs: Vec<Transaction>) -> Block {
        let mut block = Block::new(
            BlockHeader {
                version: 1,
                milestone_hash: Hash256::ZERO,
                prev_hash: Hash256::ZERO,
                tip_hash: Hash256::ZERO,
                merkle_root: Hash256::ZERO,
                time: 1_700_000_000,
                bits: 0x2100_ffff,
                nonce: 0,
            },
            txs,
        );
        block.seal().unwrap();
        block
    }

    #[test]
    fn validity_len_matches_tx_count() {
        let block = sealed_block(vec![
            Transaction::issuance(50, Hash256::digest(b"a")),
            Transaction::issuance(50, Hash256::digest(b"b")),
        ]);
        let flags = check_structure(&block, &Ed25519Scheme, &HashSet::new()).unwrap();
        assert_eq!(flags.len(), block.transaction_count());
        assert!(flags.iter().all(|f| *f == TxValidity::Valid));
    }

    #[test]
    fn tampered_payload_is_malformed() {
        let mut block = sealed_block(vec![Transaction::issuance(50, Hash256::ZERO)]);
        block.header.merkle_root = Hash256::digest(b"wrong");
        let err = check_structure(&block, &Ed25519Scheme, &HashSet::new()).unwrap_err();
        assert!(matches!(err, DagError::Malformed(_)));
    }

    #[test]
    fn double_spend_within_level_set_is_malformed() {
        let outpoint = OutPoint { txid: Hash256::digest(b"utxo"), index: 0 };
        let tx = Transaction::new(
            vec![TxInput {
                outpoint: outpoint.clone(),
                pubkey: vec![0u8; 32],
                signature: vec![0u8; 64],
            }],
            vec![TxOutput { value: 1, address: Hash256::ZERO }],
            0,
        );
        let block = sealed_block(vec![tx]);

        struct AlwaysValid;
        impl SignatureScheme for AlwaysValid {
            fn verify(&self, _: &[u8], _: &[u8], _: &[u8]) -> bool {
                true
            }
        }

        let mut spent = HashSet::new();
        spent.insert(outpoint);
        let err = check_structure(&block, &AlwaysValid, &spent).unwrap_err();
        assert!(matches!(err, DagError::Malformed(_)));
    }

    #[test]
    fn reward_sums_issuance_and_fees() {
        let block = sealed_block(vec![Transaction::issuance(50, Hash256::ZERO)]);
        assert_eq!(Vertex::block_reward(&block), 50);
    }
}
