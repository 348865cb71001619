//! DAG blocks
//!
//! A block references three ancestors: its miner's previous block, a tip
//! block, and the milestone it was built on. During the building phase
//! transactions may still be added; `seal()` finalizes the payload hash
//! and freezes the block. Once any consumer has taken the sealed hash the
//! instance must be treated as immutable.

use crate::error::{Result, TypesError};
use crate::hash::Hash256;
use crate::transaction::Transaction;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub milestone_hash: Hash256,
    pub prev_hash: Hash256,
    pub tip_hash: Hash256,
    /// Aggregate hash over the serialized transaction sequence.
    pub merkle_root: Hash256,
    /// Unix seconds.
    pub time: u64,
    /// Compact difficulty target this block claims to beat.
    pub bits: u32,
    pub nonce: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    transactions: Vec<Transaction>,

    #[serde(skip)]
    sealed_hash: OnceCell<Hash256>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Block {
            header,
            transactions,
            sealed_hash: OnceCell::new(),
        }
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed_hash.get().is_some()
    }

    /// Append a transaction during the building phase.
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<()> {
        if self.is_sealed() {
            return Err(TypesError::Sealed);
        }
        self.transactions.push(tx);
        Ok(())
    }

    /// Aggregate hash of the transaction payload.
    pub fn compute_merkle_root(&self) -> Result<Hash256> {
        let mut hasher = blake3::Hasher::new();
        for tx in &self.transactions {
            hasher.update(tx.hash()?.as_bytes());
        }
        Ok(Hash256::new(*hasher.finalize().as_bytes()))
    }

    /// Header invariant: the payload identifier matches the payload.
    pub fn verify_merkle_root(&self) -> Result<bool> {
        Ok(self.header.merkle_root == self.compute_merkle_root()?)
    }

    /// Finalize the payload hash and freeze the block, returning its
    /// identifying hash.
    pub fn seal(&mut self) -> Result<Hash256> {
        if let Some(hash) = self.sealed_hash.get() {
            return Ok(*hash);
        }
        self.header.merkle_root = self.compute_merkle_root()?;
        self.hash()
    }

    /// Identifying hash over the header bytes. Computes and caches on
    /// first use; deserialized blocks recompute lazily.
    pub fn hash(&self) -> Result<Hash256> {
        if let Some(hash) = self.sealed_hash.get() {
            return Ok(*hash);
        }
        let bytes = bincode::serialize(&self.header)?;
        Ok(*self.sealed_hash.get_or_init(|| Hash256::digest(&bytes)))
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.transactions == other.transactions
    }
}

impl Eq for Block {}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> BlockHeader {
        BlockHeader {
            version: 1,
            milestone_hash: Hash256::digest(b"ms"),
            prev_hash: Hash256::digest(b"prev"),
            tip_hash: Hash256::digest(b"tip"),
            merkle_root: Hash256::ZERO,
            time: 1_700_000_000,
            bits: 0x2100_ffff,
            nonce: 0,
        }
    }

    #[test]
    fn seal_fixes_merkle_root() {
        let mut block = Block::new(header(), Vec::new());
        block
            .add_transaction(Transaction::issuance(50, Hash256::digest(b"miner")))
            .unwrap();
        assert!(!block.verify_merkle_root().unwrap());

        block.seal().unwrap();
        assert!(block.verify_merkle_root().unwrap());
        assert!(block.is_sealed());
    }

    #[test]
    fn sealed_block_refuses_mutation() {
        let mut block = Block::new(header(), Vec::new());
        block.seal().unwrap();
        let err = block
            .add_transaction(Transaction::issuance(1, Hash256::ZERO))
            .unwrap_err();
        assert!(matches!(err, TypesError::Sealed));
    }

    #[test]
    fn hash_survives_serialization() {
        let mut block = Block::new(header(), vec![Transaction::issuance(50, Hash256::ZERO)]);
        let hash = block.seal().unwrap();

        let bytes = bincode::serialize(&block).unwrap();
        let restored: Block = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored.hash().unwrap(), hash);
        assert_eq!(restored, block);
    }

    #[test]
    fn hash_commits_to_header() {
        let mut a = Block::new(header(), Vec::new());
        let mut b = Block::new(header(), Vec::new());
        b.header.nonce = 1;
        assert_ne!(a.seal().unwrap(), b.seal().unwrap());
    }
}
