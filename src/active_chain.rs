//! The currently preferred branch, as a height-indexed projection of the tree

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::block_index::{BlockValidity, NodeId};
use crate::block_tree::BlockTree;
use crate::constants::LOCATOR_DENSE_ENTRIES;
use crate::types::*;
use crate::validation::{BlockValidationResult, ValidationState};

/// Sparse list of ancestor hashes, newest first, ending at genesis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub hashes: Vec<Hash>,
}

impl Locator {
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Why an active-chain audit stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditReason {
    NullIndex,
    HeightMismatch,
    ParentMismatch,
    InvalidTree,
    InvalidTransactions,
    InvalidScripts,
    WorkRegression,
}

impl AuditReason {
    pub fn reject_reason(self) -> &'static str {
        match self {
            AuditReason::NullIndex => "chain-null-index",
            AuditReason::HeightMismatch => "chain-height-mismatch",
            AuditReason::ParentMismatch => "chain-parent-mismatch",
            AuditReason::InvalidTree => "chain-invalid-tree",
            AuditReason::InvalidTransactions => "chain-invalid-transactions",
            AuditReason::InvalidScripts => "chain-invalid-scripts",
            AuditReason::WorkRegression => "chain-work-regression",
        }
    }

    pub fn block_result(self) -> BlockValidationResult {
        match self {
            AuditReason::ParentMismatch => BlockValidationResult::InvalidPrev,
            AuditReason::InvalidTransactions => BlockValidationResult::InvalidTx,
            AuditReason::WorkRegression => BlockValidationResult::HeaderLowWork,
            _ => BlockValidationResult::Consensus,
        }
    }
}

impl fmt::Display for AuditReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reject_reason())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainAuditFailure {
    #[error("chain-empty")]
    Empty,
    #[error("{reason} at height {height}")]
    Violation { height: Natural, reason: AuditReason },
}

/// What a successful audit looked at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainAudit {
    pub blocks_checked: u64,
    /// Transactions in the audited blocks; only counted from level 2
    pub transactions: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ActiveChain {
    entries: Vec<Option<NodeId>>,
}

impl ActiveChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn genesis(&self) -> Option<NodeId> {
        self.entries.first().copied().flatten()
    }

    pub fn tip(&self) -> Option<NodeId> {
        self.entries.last().copied().flatten()
    }

    /// Height of the tip, `None` for an empty chain
    pub fn height(&self) -> Option<Natural> {
        (self.entries.len() as Natural).checked_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn at(&self, height: Natural) -> Option<NodeId> {
        let idx = usize::try_from(height).ok()?;
        self.entries.get(idx).copied().flatten()
    }

    pub fn contains(&self, tree: &BlockTree, id: NodeId) -> bool {
        match tree.get(id) {
            Some(node) => self.at(node.height) == Some(id),
            None => false,
        }
    }

    /// Successor of `id` on this chain
    pub fn next(&self, tree: &BlockTree, id: NodeId) -> Option<NodeId> {
        if !self.contains(tree, id) {
            return None;
        }
        self.at(tree.node(id).height + 1)
    }

    /// Make `tip` the end of the chain, or clear the chain for `None`.
    ///
    /// Only the suffix that differs from the current projection is rewritten.
    pub fn set_tip(&mut self, tree: &BlockTree, tip: Option<NodeId>) {
        let old_height = self.height();
        let Some(tip) = tip else {
            self.entries.clear();
            tracing::info!(?old_height, "active chain cleared");
            return;
        };
        let Some(tip_node) = tree.get(tip) else {
            return;
        };
        let new_height = tip_node.height;
        self.entries.resize(new_height as usize + 1, None);

        let mut walk = Some(tip);
        let mut rewritten = 0u64;
        while let Some(current) = walk {
            let node = tree.node(current);
            let slot = &mut self.entries[node.height as usize];
            if *slot == Some(current) {
                break;
            }
            *slot = Some(current);
            rewritten += 1;
            walk = node.parent;
        }

        if rewritten > 0 {
            tracing::info!(
                ?old_height,
                new_height,
                fork_height = new_height + 1 - rewritten,
                tip = %hash_to_hex(&tip_node.hash),
                "active chain tip updated"
            );
        }
    }

    /// Locator for `start` (the tip when `None`). An id unknown to `tree`
    /// yields an empty locator.
    pub fn locator(&self, tree: &BlockTree, start: Option<NodeId>) -> Locator {
        let mut hashes = Vec::with_capacity(32);
        let mut step: Natural = 1;
        let mut walk = start.or_else(|| self.tip());

        while let Some(current) = walk {
            let Some(node) = tree.get(current) else {
                break;
            };
            hashes.push(node.hash);
            if node.height == 0 {
                break;
            }

            let height = node.height.saturating_sub(step);
            walk = if self.contains(tree, current) {
                self.at(height)
            } else {
                tree.get_ancestor(current, height)
            };
            if hashes.len() > LOCATOR_DENSE_ENTRIES {
                step = step.saturating_mul(2);
            }
        }
        Locator { hashes }
    }

    /// Highest node that is both an ancestor of `other` and on this chain
    pub fn find_fork(&self, tree: &BlockTree, other: NodeId) -> Option<NodeId> {
        let height = self.height()?;
        let mut walk = if tree.get(other)?.height > height {
            tree.get_ancestor(other, height)
        } else {
            Some(other)
        };
        while let Some(current) = walk {
            if self.contains(tree, current) {
                return Some(current);
            }
            walk = tree.node(current).parent;
        }
        None
    }

    /// Check the consistency of the last `depth` blocks of the chain, tip
    /// first, stopping at the first problem.
    ///
    /// Level 1 requires tree validity, level 2 transaction validity, level 3
    /// script validity and level 4 strictly increasing chain work. Nothing is
    /// repaired.
    pub fn audit(&self, tree: &BlockTree, level: u32, depth: u64) -> Result<ChainAudit, ChainAuditFailure> {
        let height = self.height().ok_or(ChainAuditFailure::Empty)?;
        let start = height.saturating_sub(depth);
        let mut audit = ChainAudit::default();

        let fail = |height: Natural, reason: AuditReason| ChainAuditFailure::Violation { height, reason };

        for h in (start..=height).rev() {
            let node = match self.at(h).and_then(|id| tree.get(id)) {
                Some(node) => node,
                None => return Err(fail(h, AuditReason::NullIndex)),
            };
            if node.height != h {
                return Err(fail(h, AuditReason::HeightMismatch));
            }
            if h > 0 && node.parent != self.at(h - 1) {
                return Err(fail(h, AuditReason::ParentMismatch));
            }
            if level >= 1 && !node.is_valid(BlockValidity::Tree) {
                return Err(fail(h, AuditReason::InvalidTree));
            }
            if level >= 2 {
                if !node.is_valid(BlockValidity::Transactions) {
                    return Err(fail(h, AuditReason::InvalidTransactions));
                }
                audit.transactions += u64::from(node.tx_count);
            }
            if level >= 3 && !node.is_valid(BlockValidity::Scripts) {
                return Err(fail(h, AuditReason::InvalidScripts));
            }
            if level >= 4 {
                if let Some(parent) = node.parent {
                    if node.chain_work <= tree.node(parent).chain_work {
                        return Err(fail(h, AuditReason::WorkRegression));
                    }
                }
            }
            audit.blocks_checked += 1;
        }
        Ok(audit)
    }

    /// [`Self::audit`], recording the outcome into `state`. An empty chain is
    /// a local error; any other failure is a zero-score invalid result.
    pub fn validate_chain(
        &self,
        tree: &BlockTree,
        level: u32,
        depth: u64,
        state: &mut ValidationState,
    ) -> bool {
        match self.audit(tree, level, depth) {
            Ok(_) => true,
            Err(ChainAuditFailure::Empty) => state.error("chain-empty"),
            Err(ChainAuditFailure::Violation { height, reason }) => {
                tracing::warn!(height, %reason, "active chain audit failed");
                state.invalid(0, reason.reject_reason(), &format!("{} at height {}", reason, height));
                state.set_block_result(reason.block_result());
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn overwrite_slot(&mut self, height: usize, id: Option<NodeId>) {
        self.entries[height] = id;
    }
}

/// Chains are equal when they have the same height and the same tip
impl PartialEq for ActiveChain {
    fn eq(&self, other: &Self) -> bool {
        self.height() == other.height() && self.tip() == other.tip()
    }
}

impl Eq for ActiveChain {}
