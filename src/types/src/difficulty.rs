//! Compact difficulty targets and the milestone retarget rule
//!
//! Targets travel in block headers as a 4-byte compact form: one exponent
//! byte and a 24-bit mantissa, so that `target = mantissa * 256^(exp - 3)`.
//! All retarget arithmetic is integer-only and consults nothing but the
//! timestamps embedded in the chain, which keeps milestone construction
//! deterministic.

use crate::error::{Result, TypesError};
use crate::hash::{Hash256, HASH_WIDTH};
use serde::{Deserialize, Serialize};

const MANTISSA_MASK: u32 = 0x007f_ffff;

/// Retarget configuration. Constants here are operational tuning, not
/// consensus invariants; nodes on one network must simply agree on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetargetParams {
    /// Desired wall-clock seconds between consecutive milestones.
    pub target_spacing: u64,

    /// Per-period adjustment clamp: the observed interval is bounded to
    /// [target_spacing / clamp_factor, target_spacing * clamp_factor].
    pub clamp_factor: u64,

    /// Ordinary blocks beat a target this many bits easier than the
    /// milestone target.
    pub block_target_shift: u32,

    /// Easiest permitted target, compact form. Retarget never relaxes
    /// past this bound.
    pub pow_limit: u32,
}

impl Default for RetargetParams {
    fn default() -> Self {
        Self {
            target_spacing: 10,
            clamp_factor: 4,
            block_target_shift: 4,
            pow_limit: 0x2100_ffff,
        }
    }
}

/// Expand a compact target into its full 256-bit form.
pub fn compact_to_target(compact: u32) -> Result<Hash256> {
    let exponent = (compact >> 24) as usize;
    let mantissa = compact & MANTISSA_MASK;

    if exponent > 33 || (compact & 0x0080_0000) != 0 {
        return Err(TypesError::InvalidCompact(compact));
    }

    let mut bytes = [0u8; HASH_WIDTH];
    if exponent <= 3 {
        let shifted = mantissa >> (8 * (3 - exponent));
        bytes[29] = (shifted >> 16) as u8;
        bytes[30] = (shifted >> 8) as u8;
        bytes[31] = shifted as u8;
    } else {
        // Least significant mantissa byte lands at 256^(exponent - 3).
        let lsb = HASH_WIDTH - 1 - (exponent - 3);
        for (i, shift) in [(0usize, 0u32), (1, 8), (2, 16)] {
            if lsb >= i {
                let idx = lsb - i;
                if idx < HASH_WIDTH {
                    bytes[idx] = (mantissa >> shift) as u8;
                }
            }
        }
    }
    Ok(Hash256::new(bytes))
}

/// Compress a full target back into compact form (lossy: keeps the top
/// three significant bytes).
pub fn target_to_compact(target: &Hash256) -> u32 {
    let bytes = target.as_bytes();
    let first = match bytes.iter().position(|b| *b != 0) {
        Some(i) => i,
        None => return 0,
    };
    let mut size = HASH_WIDTH - first;
    let mut mantissa: u32 = 0;
    for i in 0..3 {
        mantissa <<= 8;
        if first + i < HASH_WIDTH {
            mantissa |= bytes[first + i] as u32;
        }
    }
    // A set sign bit would make the compact form ambiguous.
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        size += 1;
    }
    ((size as u32) << 24) | mantissa
}

fn split(compact: u32) -> (u32, u32) {
    (compact >> 24, compact & MANTISSA_MASK)
}

fn normalize(mut exponent: u32, mut mantissa: u64) -> u32 {
    if mantissa == 0 {
        mantissa = 1;
    }
    while mantissa > MANTISSA_MASK as u64 {
        mantissa >>= 8;
        exponent += 1;
    }
    while mantissa < 0x8000 && exponent > 3 {
        mantissa <<= 8;
        exponent -= 1;
    }
    (exponent << 24) | mantissa as u32
}

/// Numeric comparison of two compact targets without full expansion.
fn compact_gt(a: u32, b: u32) -> bool {
    let (ea, ma) = split(a);
    let (eb, mb) = split(b);
    if ea != eb {
        return ea > eb;
    }
    ma > mb
}

/// Classic difficulty retarget for the milestone target: scale the previous
/// target by the observed inter-milestone interval over the desired one,
/// clamped so a single period adjusts by at most `clamp_factor` either way.
pub fn next_compact(prev: u32, actual_span: u64, params: &RetargetParams) -> u32 {
    let lower = params.target_spacing / params.clamp_factor;
    let upper = params.target_spacing * params.clamp_factor;
    let span = actual_span.clamp(lower.max(1), upper);

    let (exponent, mantissa) = split(prev);
    let scaled = (mantissa as u64) * span / params.target_spacing;
    let next = normalize(exponent, scaled);

    if compact_gt(next, params.pow_limit) {
        params.pow_limit
    } else {
        next
    }
}

/// Derive the ordinary-block target from the milestone target by relaxing
/// it `block_target_shift` bits.
pub fn block_compact_from_milestone(milestone: u32, params: &RetargetParams) -> u32 {
    let (exponent, mantissa) = split(milestone);
    let relaxed = (mantissa as u64) << params.block_target_shift;
    let next = normalize(exponent, relaxed);
    if compact_gt(next, params.pow_limit) {
        params.pow_limit
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_round_trip() {
        for compact in [0x1d00_ffff_u32, 0x2100_ffff, 0x1b04_04cb, 0x0400_8000] {
            let target = compact_to_target(compact).unwrap();
            assert_eq!(target_to_compact(&target), compact, "{compact:#010x}");
        }
    }

    #[test]
    fn rejects_negative_and_oversized() {
        assert!(compact_to_target(0x0480_0000).is_err()); // sign bit
        assert!(compact_to_target(0xff00_ffff).is_err()); // exponent too large
    }

    #[test]
    fn slow_interval_relaxes_target() {
        let params = RetargetParams::default();
        let prev = 0x1d00_ffff;
        let relaxed = next_compact(prev, params.target_spacing * 2, &params);
        assert!(
            compact_to_target(prev).unwrap() < compact_to_target(relaxed).unwrap(),
            "doubled span must relax the target"
        );
    }

    #[test]
    fn fast_interval_tightens_target() {
        let params = RetargetParams::default();
        let prev = 0x1d00_ffff;
        let tightened = next_compact(prev, params.target_spacing / 2, &params);
        assert!(compact_to_target(tightened).unwrap() < compact_to_target(prev).unwrap());
    }

    #[test]
    fn adjustment_is_clamped() {
        let params = RetargetParams::default();
        let prev = 0x1d00_ffff;
        let extreme = next_compact(prev, params.target_spacing * 1000, &params);
        let at_clamp = next_compact(prev, params.target_spacing * params.clamp_factor, &params);
        assert_eq!(extreme, at_clamp);

        let extreme = next_compact(prev, 0, &params);
        let at_clamp = next_compact(prev, params.target_spacing / params.clamp_factor, &params);
        assert_eq!(extreme, at_clamp);
    }

    #[test]
    fn never_relaxes_past_pow_limit() {
        let params = RetargetParams::default();
        let mut compact = params.pow_limit;
        for _ in 0..10 {
            compact = next_compact(compact, params.target_spacing * 100, &params);
        }
        assert_eq!(compact, params.pow_limit);
    }

    #[test]
    fn block_target_is_easier_than_milestone_target() {
        let params = RetargetParams::default();
        let ms = 0x1d00_ffff;
        let block = block_compact_from_milestone(ms, &params);
        assert!(compact_to_target(ms).unwrap() < compact_to_target(block).unwrap());
    }
}
