//! Fixed-width identifier used for block hashes and addresses
//!
//! A `Hash256` is an opaque 32-byte blob. Byte order is big-endian when the
//! value is read as an integer, so the derived lexicographic ordering is
//! also the numeric ordering used by proof-of-work comparisons.

use crate::error::{Result, TypesError};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const HASH_WIDTH: usize = 32;

/// 256-bit identifier (block hash, transaction hash, address).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Hash256([u8; HASH_WIDTH]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; HASH_WIDTH]);
    pub const MAX: Hash256 = Hash256([0xff; HASH_WIDTH]);

    pub fn new(bytes: [u8; HASH_WIDTH]) -> Self {
        Hash256(bytes)
    }

    /// Hash arbitrary bytes with the ledger hash function (BLAKE3).
    pub fn digest(data: &[u8]) -> Self {
        Hash256(*blake3::hash(data).as_bytes())
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; HASH_WIDTH] = slice
            .try_into()
            .map_err(|_| TypesError::InvalidHex(format!("expected {} bytes", HASH_WIDTH)))?;
        Ok(Hash256(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_WIDTH] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Lowercase hex, the only canonical text form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| TypesError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Numeric proof-of-work comparison: true iff `self`, read as a
    /// big-endian 256-bit integer, is at most `target`.
    pub fn meets_target(&self, target: &Hash256) -> bool {
        self.0 <= target.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let h = Hash256::digest(b"lattice");
        let parsed = Hash256::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
        assert_eq!(h.to_hex(), h.to_hex().to_lowercase());
    }

    #[test]
    fn ordering_is_big_endian_numeric() {
        let mut lo = [0u8; HASH_WIDTH];
        let mut hi = [0u8; HASH_WIDTH];
        lo[31] = 0xff; // 255
        hi[0] = 0x01; // 1 << 248
        assert!(Hash256::new(lo) < Hash256::new(hi));
        assert!(Hash256::new(lo).meets_target(&Hash256::new(hi)));
        assert!(!Hash256::new(hi).meets_target(&Hash256::new(lo)));
    }

    #[test]
    fn zero_and_max() {
        assert!(Hash256::ZERO.is_zero());
        assert!(!Hash256::MAX.is_zero());
        assert!(Hash256::digest(b"x").meets_target(&Hash256::MAX));
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(Hash256::from_hex("zz").is_err());
        assert!(Hash256::from_hex("abcd").is_err()); // wrong width
    }
}
