//! Block index entries: one per known header, with chain metadata
//!
//! Nodes are owned by [`crate::block_tree::BlockTree`]; `parent` and `skip`
//! are arena ids, never owning references.

use std::fmt;

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::constants::REJECT_INVALID;
use crate::types::*;
use crate::validation::{BlockValidationResult, ValidationState};

/// Stable arena id of a node inside its tree. Only meaningful for the tree
/// that minted it; persisted records refer to blocks by hash instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Validity levels, each implying all lower ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum BlockValidity {
    Unknown = 0,
    /// Parsed, proof of work and timestamp checked
    Header = 1,
    /// All parents known and at least Tree; height, work and time-past-median checked
    Tree = 2,
    /// Only first tx is coinbase, coinbase script length in bounds, transactions
    /// structurally valid, no duplicate txids, sigops, size and merkle root checked
    Transactions = 3,
    /// Outputs do not overspend inputs, no double spends, coinbase output ok
    Chain = 4,
    /// Scripts and signatures verified
    Scripts = 5,
}

impl BlockValidity {
    fn from_bits(bits: u32) -> Self {
        match bits & BlockStatus::VALID_MASK {
            0 => BlockValidity::Unknown,
            1 => BlockValidity::Header,
            2 => BlockValidity::Tree,
            3 => BlockValidity::Transactions,
            4 => BlockValidity::Chain,
            // 6 and 7 are never written; treat as the highest level
            _ => BlockValidity::Scripts,
        }
    }
}

/// Validity level plus data-availability and failure bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockStatus(u32);

impl BlockStatus {
    pub const VALID_MASK: u32 = 0x07;
    pub const HAVE_DATA: u32 = 8;
    pub const HAVE_UNDO: u32 = 16;
    pub const HAVE_MASK: u32 = Self::HAVE_DATA | Self::HAVE_UNDO;
    /// This block itself failed validation
    pub const FAILED_VALID: u32 = 32;
    /// Some ancestor failed validation
    pub const FAILED_CHILD: u32 = 64;
    pub const FAILED_MASK: u32 = Self::FAILED_VALID | Self::FAILED_CHILD;

    pub fn from_bits(bits: u32) -> Self {
        BlockStatus(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn validity(self) -> BlockValidity {
        BlockValidity::from_bits(self.0)
    }

    pub fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub fn insert(&mut self, flag: u32) {
        self.0 |= flag;
    }

    pub fn is_failed(self) -> bool {
        self.has(Self::FAILED_MASK)
    }

    fn set_validity(&mut self, level: BlockValidity) {
        self.0 = (self.0 & !Self::VALID_MASK) | level as u32;
    }
}

/// Location of block or undo data in the flat files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskBlockPos {
    pub file: i32,
    pub pos: u32,
}

impl DiskBlockPos {
    pub fn new(file: i32, pos: u32) -> Self {
        DiskBlockPos { file, pos }
    }

    pub fn null() -> Self {
        DiskBlockPos { file: -1, pos: 0 }
    }

    pub fn is_null(&self) -> bool {
        self.file == -1
    }
}

impl Default for DiskBlockPos {
    fn default() -> Self {
        Self::null()
    }
}

fn invert_lowest_one(n: Natural) -> Natural {
    n & n.wrapping_sub(1)
}

/// Height the skip link of a node at `height` points to.
///
/// Any value strictly below `height` is correct; this one keeps ancestor
/// walks to roughly a hundred hops for chains of 2^18 blocks.
pub fn skip_height(height: Natural) -> Natural {
    if height < 2 {
        return 0;
    }
    if height & 1 == 1 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    }
}

/// One known header with its position in the block tree
#[derive(Debug, Clone, PartialEq)]
pub struct BlockIndexNode {
    pub hash: Hash,
    pub height: Natural,
    pub parent: Option<NodeId>,
    pub skip: Option<NodeId>,
    /// Total work of the chain up to and including this block
    pub chain_work: U256,
    /// Transactions in this block; zero until the body has been seen
    pub tx_count: u32,
    /// Transactions in the chain up to and including this block; zero unless
    /// every ancestor's body has been seen
    pub chain_tx: u64,
    pub status: BlockStatus,
    pub file: i32,
    pub data_pos: u32,
    pub undo_pos: u32,
    /// Insertion order, used to break ties between equal-work tips
    pub sequence_id: u32,

    pub version: i32,
    pub merkle_root: Hash,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockIndexNode {
    /// A detached node for `header`; linking is done by the tree.
    pub fn new(header: &BlockHeader) -> Self {
        BlockIndexNode {
            hash: header.hash(),
            height: 0,
            parent: None,
            skip: None,
            chain_work: U256::zero(),
            tx_count: 0,
            chain_tx: 0,
            status: BlockStatus::default(),
            file: 0,
            data_pos: 0,
            undo_pos: 0,
            sequence_id: 0,
            version: header.version,
            merkle_root: header.merkle_root,
            time: header.timestamp,
            bits: header.bits,
            nonce: header.nonce,
        }
    }

    pub fn block_time(&self) -> i64 {
        i64::from(self.time)
    }

    /// Rebuild the header; the caller supplies the parent's hash.
    pub fn header(&self, prev_block_hash: Hash) -> BlockHeader {
        BlockHeader {
            version: self.version,
            prev_block_hash,
            merkle_root: self.merkle_root,
            timestamp: self.time,
            bits: self.bits,
            nonce: self.nonce,
        }
    }

    pub fn block_pos(&self) -> DiskBlockPos {
        if self.status.has(BlockStatus::HAVE_DATA) {
            DiskBlockPos::new(self.file, self.data_pos)
        } else {
            DiskBlockPos::null()
        }
    }

    pub fn undo_pos(&self) -> DiskBlockPos {
        if self.status.has(BlockStatus::HAVE_UNDO) {
            DiskBlockPos::new(self.file, self.undo_pos)
        } else {
            DiskBlockPos::null()
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status.is_failed()
    }

    /// Validated up to at least `level` and not failed
    pub fn is_valid(&self, level: BlockValidity) -> bool {
        if self.status.is_failed() {
            return false;
        }
        self.status.validity() >= level
    }

    /// Like [`Self::is_valid`], recording the failure cause into `state`.
    pub fn is_valid_extended(&self, level: BlockValidity, state: &mut ValidationState) -> bool {
        if self.is_valid(level) {
            return true;
        }
        if self.status.has(BlockStatus::FAILED_VALID) {
            state.invalid(REJECT_INVALID, "block-validation-failed", "Block failed validation");
            state.set_block_result(BlockValidationResult::Consensus);
        } else if self.status.has(BlockStatus::FAILED_CHILD) {
            state.invalid(REJECT_INVALID, "block-child-failed", "Block has invalid child");
            state.set_block_result(BlockValidationResult::InvalidPrev);
        }
        false
    }

    /// Raise the validity level to `level`. Never lowers it, and never
    /// touches a failed node. Returns whether anything changed.
    pub fn raise_validity(&mut self, level: BlockValidity) -> bool {
        if self.status.is_failed() {
            return false;
        }
        if self.status.validity() < level {
            self.status.set_validity(level);
            return true;
        }
        false
    }
}

impl fmt::Display for BlockIndexNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BlockIndex(height={}, merkle={}, hash={})",
            self.height,
            hash_to_hex(&self.merkle_root),
            hash_to_hex(&self.hash)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> BlockIndexNode {
        BlockIndexNode::new(&BlockHeader {
            version: 1,
            prev_block_hash: NULL_HASH,
            merkle_root: [3; 32],
            timestamp: 1_600_000_000,
            bits: 0x207fffff,
            nonce: 0,
        })
    }

    #[test]
    fn test_skip_height_small_values() {
        assert_eq!(skip_height(0), 0);
        assert_eq!(skip_height(1), 0);
        assert_eq!(skip_height(2), 0);
        assert_eq!(skip_height(3), 1);
        assert_eq!(skip_height(4), 0);
        assert_eq!(skip_height(5), 1);
        assert_eq!(skip_height(6), 4);
        assert_eq!(skip_height(7), 1);
        assert_eq!(skip_height(12), 8);
        assert_eq!(skip_height(13), 1);
        assert_eq!(skip_height(15), 9);
    }

    #[test]
    fn test_skip_height_strictly_decreases() {
        for height in 1..5_000u64 {
            assert!(skip_height(height) < height, "height {}", height);
        }
    }

    #[test]
    fn test_raise_validity_is_monotonic() {
        let mut n = node();
        assert!(n.raise_validity(BlockValidity::Tree));
        assert!(!n.raise_validity(BlockValidity::Header));
        assert_eq!(n.status.validity(), BlockValidity::Tree);
        assert!(n.raise_validity(BlockValidity::Scripts));
        assert!(!n.raise_validity(BlockValidity::Scripts));
        assert_eq!(n.status.validity(), BlockValidity::Scripts);
    }

    #[test]
    fn test_raise_validity_keeps_other_bits() {
        let mut n = node();
        n.status.insert(BlockStatus::HAVE_DATA);
        n.raise_validity(BlockValidity::Transactions);
        assert!(n.status.has(BlockStatus::HAVE_DATA));
        assert_eq!(n.status.bits(), BlockStatus::HAVE_DATA | 3);
    }

    #[test]
    fn test_failed_node_is_never_valid() {
        let mut n = node();
        n.raise_validity(BlockValidity::Scripts);
        n.status.insert(BlockStatus::FAILED_VALID);
        assert!(!n.is_valid(BlockValidity::Unknown));
        assert!(!n.is_valid(BlockValidity::Scripts));
        assert!(!n.raise_validity(BlockValidity::Scripts));
    }

    #[test]
    fn test_is_valid_extended_reports_cause() {
        let mut n = node();
        n.status.insert(BlockStatus::FAILED_CHILD);
        let mut state = ValidationState::new();
        assert!(!n.is_valid_extended(BlockValidity::Tree, &mut state));
        assert_eq!(state.reject_reason(), "block-child-failed");
        assert_eq!(state.block_result(), BlockValidationResult::InvalidPrev);

        let mut n = node();
        n.status.insert(BlockStatus::FAILED_VALID);
        let mut state = ValidationState::new();
        assert!(!n.is_valid_extended(BlockValidity::Tree, &mut state));
        assert_eq!(state.reject_reason(), "block-validation-failed");
        assert_eq!(state.block_result(), BlockValidationResult::Consensus);
    }

    #[test]
    fn test_is_valid_extended_not_failed_but_too_low() {
        let n = node();
        let mut state = ValidationState::new();
        assert!(!n.is_valid_extended(BlockValidity::Tree, &mut state));
        assert!(state.is_valid());
    }

    #[test]
    fn test_positions_require_have_bits() {
        let mut n = node();
        n.file = 3;
        n.data_pos = 100;
        n.undo_pos = 200;
        assert!(n.block_pos().is_null());
        assert!(n.undo_pos().is_null());

        n.status.insert(BlockStatus::HAVE_DATA);
        assert_eq!(n.block_pos(), DiskBlockPos::new(3, 100));
        assert!(n.undo_pos().is_null());

        n.status.insert(BlockStatus::HAVE_UNDO);
        assert_eq!(n.undo_pos(), DiskBlockPos::new(3, 200));
    }

    #[test]
    fn test_header_reconstruction() {
        let n = node();
        let header = n.header(NULL_HASH);
        assert_eq!(header.hash(), n.hash);
    }
}
