//! Merkle root over an ordered transaction list

use crate::serialize::sha256d;
use crate::types::*;

/// A computed merkle root and whether the leaf list was malleated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MerkleRoot {
    pub root: Hash,
    /// Two identical sibling hashes were found at some level. Such a list
    /// shares its root with a shorter list, so the block body cannot be
    /// trusted even though the root matches.
    pub mutated: bool,
}

/// Compute the merkle root of `leaves`, duplicating the last hash of any odd level.
///
/// An empty list yields the null hash.
pub fn compute_merkle_root(leaves: &[Hash]) -> MerkleRoot {
    if leaves.is_empty() {
        return MerkleRoot { root: NULL_HASH, mutated: false };
    }

    let mut level = leaves.to_vec();
    let mut mutated = false;
    while level.len() > 1 {
        for pair in level.chunks_exact(2) {
            if pair[0] == pair[1] {
                mutated = true;
            }
        }
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1];
            level.push(last);
        }
        level = level
            .chunks_exact(2)
            .map(|pair| {
                let mut combined = [0u8; 64];
                combined[..32].copy_from_slice(&pair[0]);
                combined[32..].copy_from_slice(&pair[1]);
                sha256d(&combined)
            })
            .collect();
    }

    MerkleRoot { root: level[0], mutated }
}

/// Merkle root over the block's transaction ids
pub fn block_merkle_root(block: &Block) -> MerkleRoot {
    let txids: Vec<Hash> = block.transactions.iter().map(|tx| tx.txid()).collect();
    compute_merkle_root(&txids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_leaf_is_root() {
        let leaf = [7u8; 32];
        let merkle = compute_merkle_root(&[leaf]);
        assert_eq!(merkle.root, leaf);
        assert!(!merkle.mutated);
    }

    #[test]
    fn test_empty_list() {
        let merkle = compute_merkle_root(&[]);
        assert_eq!(merkle.root, NULL_HASH);
        assert!(!merkle.mutated);
    }

    #[test]
    fn test_two_leaves() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let mut combined = Vec::new();
        combined.extend_from_slice(&a);
        combined.extend_from_slice(&b);
        assert_eq!(compute_merkle_root(&[a, b]).root, sha256d(&combined));
    }

    #[test]
    fn test_odd_level_duplicates_last_leaf() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let c = [3u8; 32];
        let three = compute_merkle_root(&[a, b, c]);
        let four = compute_merkle_root(&[a, b, c, c]);
        // Same root, but the explicit duplicate is flagged
        assert_eq!(three.root, four.root);
        assert!(!three.mutated);
        assert!(four.mutated);
    }

    #[test]
    fn test_order_matters() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_ne!(compute_merkle_root(&[a, b]).root, compute_merkle_root(&[b, a]).root);
    }
}
