//! # Chain-Index
//!
//! Block index, active-chain tracking and the context-free consensus checks
//! of a Bitcoin-derived full node.
//!
//! The crate keeps every known header in a [`BlockTree`], projects the
//! currently preferred branch into an [`ActiveChain`], and validates
//! headers, blocks and transactions against explicit [`ChainParams`].
//!
//! ## Architecture
//!
//! - `block_tree` / `block_index`: arena of index nodes with parent and skip links
//! - `active_chain`: height-indexed view of one branch (locators, fork search, audits)
//! - `block`, `transaction`: rule checks returning [`CheckResult`]
//! - `validator`: state-recording entry points and the header/block pipeline
//! - `disk`: persisted node records
//!
//! ## Design Principles
//!
//! 1. **Explicit results**: rule checks return a value or a [`RuleViolation`];
//!    [`ValidationState`] only accumulates them
//! 2. **No globals**: network parameters are a value passed in at construction
//! 3. **Exact Version Pinning**: consensus-critical hashing dependencies are pinned
//! 4. **Synchronous**: no I/O or suspension points inside the index
//!
//! ## Usage
//!
//! ```rust
//! use chain_index::{ChainIndex, ChainParams, ValidationState};
//! use chain_index::types::*;
//!
//! let index = ChainIndex::new(ChainParams { check_pow: false, ..ChainParams::regtest() });
//! let genesis = BlockHeader {
//!     version: 1,
//!     prev_block_hash: NULL_HASH,
//!     merkle_root: [0; 32],
//!     timestamp: 1_600_000_000,
//!     bits: 0x207fffff,
//!     nonce: 0,
//! };
//!
//! let mut state = ValidationState::new();
//! let hash = index.accept_block_header(&genesis, &mut state).unwrap();
//! index.set_tip(&hash).unwrap();
//! assert_eq!(index.height(), Some(0));
//! assert_eq!(index.locator().hashes, vec![hash]);
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod serialize;
pub mod params;
pub mod validation;
pub mod pow;
pub mod merkle;
pub mod clock;
pub mod coins;
pub mod script;
pub mod transaction;
pub mod block;
pub mod block_index;
pub mod block_tree;
pub mod active_chain;
pub mod validator;
pub mod disk;

use std::sync::Arc;

use parking_lot::RwLock;

// Re-export commonly used types
pub use active_chain::{ActiveChain, AuditReason, ChainAudit, ChainAuditFailure, Locator};
pub use block_index::{BlockIndexNode, BlockStatus, BlockValidity, DiskBlockPos, NodeId};
pub use block_tree::BlockTree;
pub use constants::*;
pub use disk::{BlockIndexStore, DiskBlockIndex, MemoryBlockIndexStore};
pub use error::{ConsensusError, Result};
pub use params::ChainParams;
pub use types::*;
pub use validation::{
    BlockValidationResult, CheckResult, RuleViolation, TxValidationResult, ValidationMode,
    ValidationState,
};
pub use validator::ConsensusValidator;

/// Tree and active chain, guarded together
#[derive(Debug, Default)]
struct IndexState {
    tree: BlockTree,
    chain: ActiveChain,
}

/// Shared block index
///
/// One lock serializes every mutation of the tree and the active chain.
/// Queries take the lock for reading and return owned snapshots.
///
/// # Examples
///
/// ```
/// use chain_index::{ChainIndex, ChainParams};
///
/// let index = ChainIndex::new(ChainParams::regtest());
/// assert_eq!(index.height(), None);
/// assert!(index.tip().is_none());
/// ```
pub struct ChainIndex {
    validator: ConsensusValidator,
    state: RwLock<IndexState>,
}

impl ChainIndex {
    pub fn new(params: ChainParams) -> Self {
        Self::with_validator(ConsensusValidator::new(Arc::new(params)))
    }

    /// Index driven by a custom validator, e.g. one with a fixed clock
    pub fn with_validator(validator: ConsensusValidator) -> Self {
        ChainIndex { validator, state: RwLock::new(IndexState::default()) }
    }

    /// Rebuild an index from persisted records. The active chain starts empty.
    pub fn load(validator: ConsensusValidator, store: &dyn BlockIndexStore) -> Result<Self> {
        let tree = BlockTree::load_from(store)?;
        Ok(ChainIndex {
            validator,
            state: RwLock::new(IndexState { tree, chain: ActiveChain::new() }),
        })
    }

    pub fn params(&self) -> &ChainParams {
        self.validator.params()
    }

    pub fn validator(&self) -> &ConsensusValidator {
        &self.validator
    }

    /// Check and index a header; returns its hash on success
    pub fn accept_block_header(&self, header: &BlockHeader, state: &mut ValidationState) -> Option<Hash> {
        let mut guard = self.state.write();
        let id = self.validator.accept_block_header(&mut guard.tree, header, state)?;
        Some(guard.tree.node(id).hash)
    }

    /// Check and index a full block stored at `pos`; returns its hash on success
    pub fn accept_block(&self, block: &Block, pos: DiskBlockPos, state: &mut ValidationState) -> Option<Hash> {
        let mut guard = self.state.write();
        let id = self.validator.accept_block(&mut guard.tree, block, pos, state)?;
        Some(guard.tree.node(id).hash)
    }

    /// Make the block with `hash` the active tip
    pub fn set_tip(&self, hash: &Hash) -> Result<()> {
        let mut guard = self.state.write();
        let IndexState { tree, chain } = &mut *guard;
        let id = tree
            .lookup(hash)
            .ok_or_else(|| ConsensusError::UnknownBlock(hash_to_hex(hash)))?;
        chain.set_tip(tree, Some(id));
        Ok(())
    }

    pub fn clear_tip(&self) {
        let mut guard = self.state.write();
        let IndexState { tree, chain } = &mut *guard;
        chain.set_tip(tree, None);
    }

    pub fn tip(&self) -> Option<BlockIndexNode> {
        let guard = self.state.read();
        guard.chain.tip().map(|id| guard.tree.node(id).clone())
    }

    pub fn height(&self) -> Option<Natural> {
        self.state.read().chain.height()
    }

    pub fn lookup(&self, hash: &Hash) -> Option<BlockIndexNode> {
        let guard = self.state.read();
        guard.tree.lookup(hash).map(|id| guard.tree.node(id).clone())
    }

    /// Whether the block with `hash` is on the active chain
    pub fn contains(&self, hash: &Hash) -> bool {
        let guard = self.state.read();
        guard
            .tree
            .lookup(hash)
            .map_or(false, |id| guard.chain.contains(&guard.tree, id))
    }

    /// Hash at `height` on the active chain
    pub fn hash_at(&self, height: Natural) -> Option<Hash> {
        let guard = self.state.read();
        guard.chain.at(height).map(|id| guard.tree.node(id).hash)
    }

    /// Locator for the active tip
    pub fn locator(&self) -> Locator {
        let guard = self.state.read();
        guard.chain.locator(&guard.tree, None)
    }

    /// Locator for an arbitrary indexed block
    pub fn locator_for(&self, hash: &Hash) -> Option<Locator> {
        let guard = self.state.read();
        let id = guard.tree.lookup(hash)?;
        Some(guard.chain.locator(&guard.tree, Some(id)))
    }

    /// Hash of the highest block on the active chain that is also an ancestor of `hash`
    pub fn find_fork(&self, hash: &Hash) -> Option<Hash> {
        let guard = self.state.read();
        let id = guard.tree.lookup(hash)?;
        let fork = guard.chain.find_fork(&guard.tree, id)?;
        Some(guard.tree.node(fork).hash)
    }

    /// Indexed block with the most work that has not failed validation
    pub fn best_header(&self) -> Option<Hash> {
        let guard = self.state.read();
        let tree = &guard.tree;
        tree.iter()
            .filter(|(_, node)| !node.is_failed())
            .map(|(id, _)| id)
            .max_by(|&a, &b| tree.work_order(a, b))
            .map(|id| tree.node(id).hash)
    }

    pub fn validate_chain(&self, level: u32, depth: u64, state: &mut ValidationState) -> bool {
        let guard = self.state.read();
        guard.chain.validate_chain(&guard.tree, level, depth, state)
    }

    /// Permanently mark the block with `hash` and its descendants as failed
    pub fn mark_failed(&self, hash: &Hash) -> Result<usize> {
        let mut guard = self.state.write();
        let id = guard
            .tree
            .lookup(hash)
            .ok_or_else(|| ConsensusError::UnknownBlock(hash_to_hex(hash)))?;
        Ok(guard.tree.mark_failed(id))
    }

    pub fn save_to(&self, store: &mut dyn BlockIndexStore) -> Result<usize> {
        self.state.read().tree.save_to(store)
    }

    /// Run `f` with shared access to the tree and the active chain
    pub fn with_read<R>(&self, f: impl FnOnce(&BlockTree, &ActiveChain) -> R) -> R {
        let guard = self.state.read();
        f(&guard.tree, &guard.chain)
    }

    /// Run `f` with exclusive access, for sequences that must appear atomic
    /// such as finding a fork and then moving the tip
    pub fn with_write<R>(&self, f: impl FnOnce(&mut BlockTree, &mut ActiveChain) -> R) -> R {
        let mut guard = self.state.write();
        let IndexState { tree, chain } = &mut *guard;
        f(tree, chain)
    }
}
