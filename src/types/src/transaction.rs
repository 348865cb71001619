//! Transactions and the pluggable signature seam
//!
//! The ledger core never names a concrete signature algorithm; admission
//! code verifies through [`SignatureScheme`]. An ed25519 implementation is
//! provided for nodes and tests.

use crate::error::Result;
use crate::hash::Hash256;
use serde::{Deserialize, Serialize};

/// Reference to a previous transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash256,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub outpoint: OutPoint,
    pub pubkey: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    /// Hash of the receiving public key.
    pub address: Hash256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub fee: u64,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>, fee: u64) -> Self {
        Transaction { inputs, outputs, fee }
    }

    /// Coinbase-style issuance transaction: no inputs, one output.
    pub fn issuance(value: u64, address: Hash256) -> Self {
        Transaction {
            inputs: Vec::new(),
            outputs: vec![TxOutput { value, address }],
            fee: 0,
        }
    }

    pub fn is_issuance(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn hash(&self) -> Result<Hash256> {
        Ok(Hash256::digest(&bincode::serialize(self)?))
    }

    /// The bytes each input signature commits to: the transaction with all
    /// input signatures blanked.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        let mut unsigned = self.clone();
        for input in &mut unsigned.inputs {
            input.signature.clear();
        }
        Ok(bincode::serialize(&unsigned)?)
    }

    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }
}

/// Signature verification seam. Anything with
/// `verify(pubkey, msg, sig) -> bool` semantics plugs in here.
pub trait SignatureScheme: Send + Sync {
    fn verify(&self, pubkey: &[u8], msg: &[u8], sig: &[u8]) -> bool;
}

/// ed25519 verification via `ed25519-dalek`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Scheme;

impl SignatureScheme for Ed25519Scheme {
    fn verify(&self, pubkey: &[u8], msg: &[u8], sig: &[u8]) -> bool {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};

        let Ok(key_bytes) = <&[u8; 32]>::try_from(pubkey) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(key_bytes) else {
            return false;
        };
        let Ok(sig_bytes) = <&[u8; 64]>::try_from(sig) else {
            return false;
        };
        key.verify(msg, &Signature::from_bytes(sig_bytes)).is_ok()
    }
}
