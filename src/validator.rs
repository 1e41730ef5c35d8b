//! State-recording entry points for the rule checks, and the staged
//! header/block acceptance pipeline over a [`BlockTree`]
//!
//! Every method returns whether the entity passed and, on failure, has
//! already written the outcome and misbehavior score into the supplied
//! [`ValidationState`].

use std::sync::Arc;

use crate::block;
use crate::block_index::{BlockStatus, BlockValidity, DiskBlockPos, NodeId};
use crate::block_tree::BlockTree;
use crate::clock::{SystemTimeSource, TimeSource};
use crate::coins::CoinsView;
use crate::constants::REJECT_DUPLICATE;
use crate::params::ChainParams;
use crate::pow::{block_proof, PowHasher, Sha256dPow};
use crate::script::ScriptVerifier;
use crate::transaction;
use crate::types::*;
use crate::validation::{BlockValidationResult, RuleViolation, ValidationState};

#[derive(Clone)]
pub struct ConsensusValidator {
    params: Arc<ChainParams>,
    pow: Arc<dyn PowHasher>,
    clock: Arc<dyn TimeSource>,
}

impl ConsensusValidator {
    /// Validator using double SHA-256 proof of work and the system clock
    pub fn new(params: Arc<ChainParams>) -> Self {
        ConsensusValidator {
            params,
            pow: Arc::new(Sha256dPow),
            clock: Arc::new(SystemTimeSource::default()),
        }
    }

    pub fn with_pow_hasher(mut self, pow: Arc<dyn PowHasher>) -> Self {
        self.pow = pow;
        self
    }

    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn check_block_header(&self, header: &BlockHeader, state: &mut ValidationState) -> bool {
        state.check(block::check_block_header(header, &self.params, self.pow.as_ref(), self.clock.as_ref()))
    }

    pub fn check_transaction(&self, tx: &Transaction, state: &mut ValidationState) -> bool {
        state.check(transaction::check_transaction(tx, &self.params))
    }

    /// Input and value checks of `tx` spent at `spend_height`
    pub fn check_tx_inputs(
        &self,
        tx: &Transaction,
        view: &dyn CoinsView,
        spend_height: Natural,
        state: &mut ValidationState,
    ) -> bool {
        state.check(transaction::check_tx_inputs(tx, view, spend_height, &self.params))
    }

    pub fn check_input_scripts(
        &self,
        tx: &Transaction,
        view: &dyn CoinsView,
        verifier: &dyn ScriptVerifier,
        flags: u32,
        state: &mut ValidationState,
    ) -> bool {
        state.check(transaction::check_input_scripts(tx, view, verifier, flags))
    }

    pub fn check_block(&self, block: &Block, state: &mut ValidationState) -> bool {
        state.check(block::check_block(block, &self.params, self.pow.as_ref()))
    }

    pub fn contextual_check_block_header(
        &self,
        header: &BlockHeader,
        tree: &BlockTree,
        parent: NodeId,
        state: &mut ValidationState,
    ) -> bool {
        state.check(block::contextual_check_block_header(header, tree, parent, &self.params))
    }

    /// Check `header` and index it in `tree`, raising it to tree validity.
    ///
    /// A header that is already indexed is returned as-is unless it has
    /// failed validation before.
    pub fn accept_block_header(
        &self,
        tree: &mut BlockTree,
        header: &BlockHeader,
        state: &mut ValidationState,
    ) -> Option<NodeId> {
        let hash = header.hash();
        if let Some(existing) = tree.lookup(&hash) {
            if tree.node(existing).is_failed() {
                state.apply(
                    &RuleViolation::block(BlockValidationResult::CachedInvalid, 0, "duplicate")
                        .with_reject_code(REJECT_DUPLICATE)
                        .with_debug(format!("block {} is marked invalid", hash_to_hex(&hash))),
                );
                return None;
            }
            return Some(existing);
        }

        if !self.check_block_header(header, state) {
            return None;
        }

        if header.is_genesis() {
            if tree.genesis().is_some() {
                state.apply(&RuleViolation::block(BlockValidationResult::InvalidHeader, 100, "bad-genesis"));
                return None;
            }
        } else {
            let Some(parent) = tree.lookup(&header.prev_block_hash) else {
                state.apply(
                    &RuleViolation::block(BlockValidationResult::MissingPrev, 10, "prev-blk-not-found")
                        .with_debug(hash_to_hex(&header.prev_block_hash)),
                );
                return None;
            };
            if tree.node(parent).is_failed() {
                state.apply(&RuleViolation::block(BlockValidationResult::InvalidPrev, 100, "bad-prevblk"));
                return None;
            }
            if !self.contextual_check_block_header(header, tree, parent, state) {
                return None;
            }
        }

        match tree.insert(header, block_proof(header.bits)) {
            Ok(id) => {
                tree.raise_validity(id, BlockValidity::Tree);
                Some(id)
            }
            Err(e) => {
                state.error(&e.to_string());
                None
            }
        }
    }

    /// Accept a full block whose body is stored at `pos`.
    ///
    /// The header goes through [`Self::accept_block_header`] first. A body
    /// that fails the context-free checks marks the node failed, unless the
    /// failure may be due to corruption in transit.
    pub fn accept_block(
        &self,
        tree: &mut BlockTree,
        block: &Block,
        pos: DiskBlockPos,
        state: &mut ValidationState,
    ) -> Option<NodeId> {
        let id = self.accept_block_header(tree, &block.header, state)?;
        if tree.node(id).status.has(BlockStatus::HAVE_DATA) {
            return Some(id);
        }

        if !self.check_block(block, state) {
            if state.is_invalid() && !state.corruption_possible() {
                tree.mark_failed(id);
            }
            return None;
        }

        let tx_count = u32::try_from(block.transactions.len()).unwrap_or(u32::MAX);
        if let Err(e) = tree.set_block_data(id, pos, tx_count) {
            state.error(&e.to_string());
            return None;
        }
        tree.raise_validity(id, BlockValidity::Transactions);
        Some(id)
    }
}
