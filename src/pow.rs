//! Proof of work: compact target decoding, the PoW check and per-block work

use primitive_types::U256;

use crate::serialize::{serialize_header, sha256d};
use crate::types::*;

/// Source of the proof-of-work hash for a header. The content hash
/// ([`BlockHeader::hash`]) and the PoW hash may differ on some networks.
pub trait PowHasher: Send + Sync {
    fn pow_hash(&self, header: &BlockHeader) -> Hash;
}

/// Double SHA-256 over the 80-byte header encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256dPow;

impl PowHasher for Sha256dPow {
    fn pow_hash(&self, header: &BlockHeader) -> Hash {
        sha256d(&serialize_header(header))
    }
}

/// A target decoded from its compact form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactTarget {
    pub target: U256,
    pub negative: bool,
    pub overflow: bool,
}

/// Expand target from compact representation
///
/// The format is `0xEEMMMMMM`: an exponent byte and a 23-bit mantissa with a
/// sign bit at 0x00800000. The target is `mantissa * 256^(exponent - 3)`.
pub fn expand_compact(bits: u32) -> CompactTarget {
    let size = bits >> 24;
    let word = bits & 0x007f_ffff;

    let target = if size <= 3 {
        U256::from(word >> (8 * (3 - size)))
    } else if word == 0 {
        U256::zero()
    } else {
        let shift = 8 * (size - 3) as usize;
        if shift >= 256 {
            U256::zero()
        } else {
            U256::from(word) << shift
        }
    };

    let negative = word != 0 && (bits & 0x0080_0000) != 0;
    let overflow = word != 0
        && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));

    CompactTarget { target, negative, overflow }
}

/// Interpret a hash as a 256-bit little-endian number
pub fn hash_to_u256(hash: &Hash) -> U256 {
    U256::from_little_endian(hash)
}

/// CheckProofOfWork: hash ≤ ExpandTarget(bits) ≤ ExpandTarget(pow_limit)
pub fn check_proof_of_work(pow_hash: &Hash, bits: u32, pow_limit_bits: u32) -> bool {
    let decoded = expand_compact(bits);
    if decoded.negative || decoded.overflow || decoded.target.is_zero() {
        return false;
    }
    if decoded.target > expand_compact(pow_limit_bits).target {
        return false;
    }
    hash_to_u256(pow_hash) <= decoded.target
}

/// Expected number of hashes needed to meet `bits`: 2^256 / (target + 1).
///
/// Computed as `~target / (target + 1) + 1` since 2^256 does not fit.
/// Unusable targets contribute no work.
pub fn block_proof(bits: u32) -> U256 {
    let decoded = expand_compact(bits);
    if decoded.negative || decoded.overflow || decoded.target.is_zero() {
        return U256::zero();
    }
    (!decoded.target / (decoded.target + U256::one())) + U256::one()
}
