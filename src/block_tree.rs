//! The tree of every known block header
//!
//! An arena of [`BlockIndexNode`]s keyed by content hash. Nodes are only ever
//! added; a parent is always inserted before its children, so arena order is
//! a topological order of the tree.

use std::cmp::Ordering;
use std::collections::HashMap;

use primitive_types::U256;

use crate::block_index::*;
use crate::error::{ConsensusError, Result};
use crate::types::*;
use crate::validation::ValidationState;

#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    nodes: Vec<BlockIndexNode>,
    by_hash: HashMap<Hash, NodeId>,
    genesis: Option<NodeId>,
    next_sequence_id: u32,
}

impl BlockTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn genesis(&self) -> Option<NodeId> {
        self.genesis
    }

    pub fn lookup(&self, hash: &Hash) -> Option<NodeId> {
        self.by_hash.get(hash).copied()
    }

    pub fn get(&self, id: NodeId) -> Option<&BlockIndexNode> {
        self.nodes.get(id.0)
    }

    /// Node by id. Ids are only minted by this tree and nodes are never
    /// removed, so an id from this tree is always present.
    pub fn node(&self, id: NodeId) -> &BlockIndexNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut BlockIndexNode> {
        self.nodes.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &BlockIndexNode)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    /// Index a new header.
    ///
    /// The parent is found through `prev_block_hash`; a header with a null
    /// previous hash becomes the genesis node. `proof` is the work this block
    /// contributes and is added to the parent's cumulative work.
    pub fn insert(&mut self, header: &BlockHeader, proof: U256) -> Result<NodeId> {
        let mut node = BlockIndexNode::new(header);
        if self.by_hash.contains_key(&node.hash) {
            return Err(ConsensusError::DuplicateBlock(hash_to_hex(&node.hash)));
        }

        let parent = if header.is_genesis() {
            if self.genesis.is_some() {
                return Err(ConsensusError::DuplicateGenesis(hash_to_hex(&node.hash)));
            }
            None
        } else {
            let parent = self
                .lookup(&header.prev_block_hash)
                .ok_or_else(|| ConsensusError::UnknownParent(hash_to_hex(&header.prev_block_hash)))?;
            Some(parent)
        };

        match parent {
            Some(parent_id) => {
                let parent_node = self.node(parent_id);
                node.parent = Some(parent_id);
                node.height = parent_node.height + 1;
                node.chain_work = parent_node.chain_work.saturating_add(proof);
                if parent_node.is_failed() {
                    node.status.insert(BlockStatus::FAILED_CHILD);
                }
            }
            None => {
                node.chain_work = proof;
            }
        }
        node.sequence_id = self.next_sequence_id;
        self.next_sequence_id = self.next_sequence_id.wrapping_add(1);

        let id = NodeId(self.nodes.len());
        tracing::debug!(
            height = node.height,
            hash = %hash_to_hex(&node.hash),
            id = %id,
            "indexed header"
        );
        self.by_hash.insert(node.hash, id);
        self.nodes.push(node);
        if parent.is_none() {
            self.genesis = Some(id);
        }
        self.build_skip(id);
        Ok(id)
    }

    /// Point the node's skip link at its ancestor at `skip_height(height)`.
    pub fn build_skip(&mut self, id: NodeId) {
        let (parent, height) = {
            let node = self.node(id);
            (node.parent, node.height)
        };
        if let Some(parent) = parent {
            let skip = self.get_ancestor(parent, skip_height(height));
            self.nodes[id.0].skip = skip;
        }
    }

    /// Ancestor of `id` at `height`, or `None` if `height` is above the node.
    pub fn get_ancestor(&self, id: NodeId, height: Natural) -> Option<NodeId> {
        let start = self.get(id)?;
        if height > start.height {
            return None;
        }

        let mut walk = id;
        let mut walk_height = start.height;
        while walk_height > height {
            let node = &self.nodes[walk.0];
            let height_skip = skip_height(walk_height);
            let height_skip_prev = skip_height(walk_height - 1);
            match node.skip {
                // Only follow skip if parent's skip isn't a better approach than skip's parent.
                Some(skip)
                    if height_skip == height
                        || (height_skip > height
                            && !(height_skip_prev + 2 < height_skip
                                && height_skip_prev >= height)) =>
                {
                    walk = skip;
                    walk_height = height_skip;
                }
                _ => {
                    walk = node.parent?;
                    walk_height -= 1;
                }
            }
        }
        Some(walk)
    }

    /// Highest node that is an ancestor of both `a` and `b`
    pub fn last_common_ancestor(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let height_a = self.get(a)?.height;
        let height_b = self.get(b)?.height;
        let mut a = if height_a > height_b { self.get_ancestor(a, height_b)? } else { a };
        let mut b = if height_b > height_a { self.get_ancestor(b, height_a)? } else { b };
        while a != b {
            a = self.node(a).parent?;
            b = self.node(b).parent?;
        }
        Some(a)
    }

    /// Preference order between two candidate tips: more work wins, and on a
    /// tie the one indexed first wins.
    pub fn work_order(&self, a: NodeId, b: NodeId) -> Ordering {
        let (na, nb) = (self.node(a), self.node(b));
        na.chain_work
            .cmp(&nb.chain_work)
            .then_with(|| nb.sequence_id.cmp(&na.sequence_id))
    }

    pub fn raise_validity(&mut self, id: NodeId, level: BlockValidity) -> bool {
        match self.nodes.get_mut(id.0) {
            Some(node) => node.raise_validity(level),
            None => false,
        }
    }

    pub fn is_valid(&self, id: NodeId, level: BlockValidity) -> bool {
        self.get(id).map_or(false, |node| node.is_valid(level))
    }

    pub fn is_valid_extended(&self, id: NodeId, level: BlockValidity, state: &mut ValidationState) -> bool {
        match self.get(id) {
            Some(node) => node.is_valid_extended(level, state),
            None => state.error("unknown-block-index"),
        }
    }

    /// Permanently mark `id` as failed and every known descendant as
    /// failed-child. Returns the number of descendants newly marked.
    pub fn mark_failed(&mut self, id: NodeId) -> usize {
        let Some(node) = self.nodes.get_mut(id.0) else {
            return 0;
        };
        node.status.insert(BlockStatus::FAILED_VALID);
        let height = node.height;
        let hash = node.hash;

        let mut marked = 0;
        for idx in id.0 + 1..self.nodes.len() {
            let Some(parent) = self.nodes[idx].parent else {
                continue;
            };
            if self.nodes[parent.0].is_failed() && !self.nodes[idx].status.has(BlockStatus::FAILED_CHILD) {
                self.nodes[idx].status.insert(BlockStatus::FAILED_CHILD);
                marked += 1;
            }
        }
        tracing::warn!(
            height,
            hash = %hash_to_hex(&hash),
            descendants = marked,
            "marked block failed"
        );
        marked
    }

    /// Record that the block body is stored at `pos` and holds `tx_count`
    /// transactions. Chain transaction counts are filled in for this node and
    /// for any descendant whose ancestry is now fully known.
    pub fn set_block_data(&mut self, id: NodeId, pos: DiskBlockPos, tx_count: u32) -> Result<()> {
        let node = self.nodes.get_mut(id.0).ok_or(ConsensusError::UnknownNode(id.0))?;
        node.file = pos.file;
        node.data_pos = pos.pos;
        node.tx_count = tx_count;
        node.status.insert(BlockStatus::HAVE_DATA);

        for idx in id.0..self.nodes.len() {
            let node = &self.nodes[idx];
            if node.chain_tx != 0 || node.tx_count == 0 {
                continue;
            }
            let base = match node.parent {
                None => Some(0),
                Some(parent) => match self.nodes[parent.0].chain_tx {
                    0 => None,
                    chain_tx => Some(chain_tx),
                },
            };
            if let Some(base) = base {
                self.nodes[idx].chain_tx = base + u64::from(self.nodes[idx].tx_count);
            }
        }
        Ok(())
    }

    /// Record that undo data for the block is stored at `pos`
    pub fn set_undo(&mut self, id: NodeId, pos: DiskBlockPos) -> Result<()> {
        let node = self.nodes.get_mut(id.0).ok_or(ConsensusError::UnknownNode(id.0))?;
        node.file = pos.file;
        node.undo_pos = pos.pos;
        node.status.insert(BlockStatus::HAVE_UNDO);
        Ok(())
    }

    /// Rebuild the header of `id`, taking the previous hash from its parent
    pub fn block_header(&self, id: NodeId) -> BlockHeader {
        let node = self.node(id);
        let prev = node.parent.map_or(NULL_HASH, |p| self.node(p).hash);
        node.header(prev)
    }

    /// Median timestamp of `id` and up to `span - 1` of its ancestors. The
    /// window always holds at least `id` itself.
    pub fn median_time_past(&self, id: NodeId, span: usize) -> i64 {
        let span = span.max(1);
        let mut times = Vec::with_capacity(span);
        let mut walk = Some(id);
        while let Some(current) = walk {
            if times.len() == span {
                break;
            }
            let node = self.node(current);
            times.push(node.block_time());
            walk = node.parent;
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// Whether at least `required` of the last `window` blocks ending at
    /// `start` have version `min_version` or higher.
    pub fn is_super_majority(
        &self,
        min_version: i32,
        start: Option<NodeId>,
        required: u32,
        window: u32,
    ) -> bool {
        let mut found = 0u32;
        let mut walk = start;
        let mut i = 0u32;
        while i < window && found < required {
            let Some(current) = walk else {
                break;
            };
            let node = self.node(current);
            if node.version >= min_version {
                found += 1;
            }
            walk = node.parent;
            i += 1;
        }
        found >= required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(prev: Hash, nonce: u32) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block_hash: prev,
            merkle_root: [0; 32],
            timestamp: 1_600_000_000 + nonce,
            bits: 0x207fffff,
            nonce,
        }
    }

    /// Linear chain of `len` nodes, each contributing one unit of work
    fn chain(tree: &mut BlockTree, len: usize) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let mut prev = NULL_HASH;
        for i in 0..len {
            let id = tree.insert(&header(prev, i as u32), U256::one()).unwrap();
            prev = tree.node(id).hash;
            ids.push(id);
        }
        ids
    }

    fn walk_parents(tree: &BlockTree, mut id: NodeId, steps: u64) -> NodeId {
        for _ in 0..steps {
            id = tree.node(id).parent.unwrap();
        }
        id
    }

    #[test]
    fn test_insert_links_height_and_work() {
        let mut tree = BlockTree::new();
        let ids = chain(&mut tree, 3);
        assert_eq!(tree.genesis(), Some(ids[0]));
        assert_eq!(tree.node(ids[2]).height, 2);
        assert_eq!(tree.node(ids[2]).parent, Some(ids[1]));
        assert_eq!(tree.node(ids[2]).chain_work, U256::from(3u64));
        assert_eq!(tree.node(ids[0]).parent, None);
        assert_eq!(tree.node(ids[2]).status.validity(), BlockValidity::Unknown);
    }

    #[test]
    fn test_insert_unknown_parent_fails() {
        let mut tree = BlockTree::new();
        chain(&mut tree, 1);
        let orphan = header([9; 32], 1);
        assert!(matches!(tree.insert(&orphan, U256::one()), Err(ConsensusError::UnknownParent(_))));
    }

    #[test]
    fn test_insert_duplicate_and_second_genesis_fail() {
        let mut tree = BlockTree::new();
        chain(&mut tree, 1);
        assert!(matches!(
            tree.insert(&header(NULL_HASH, 0), U256::one()),
            Err(ConsensusError::DuplicateBlock(_))
        ));
        assert!(matches!(
            tree.insert(&header(NULL_HASH, 99), U256::one()),
            Err(ConsensusError::DuplicateGenesis(_))
        ));
    }

    #[test]
    fn test_sequence_ids_increase() {
        let mut tree = BlockTree::new();
        let ids = chain(&mut tree, 4);
        for pair in ids.windows(2) {
            assert!(tree.node(pair[1]).sequence_id > tree.node(pair[0]).sequence_id);
        }
    }

    #[test]
    fn test_skip_points_at_skip_height() {
        let mut tree = BlockTree::new();
        let ids = chain(&mut tree, 300);
        for &id in &ids {
            let node = tree.node(id);
            match node.skip {
                Some(skip) => {
                    assert_eq!(tree.node(skip).height, skip_height(node.height));
                    assert_eq!(tree.get_ancestor(id, tree.node(skip).height), Some(skip));
                }
                None => assert_eq!(node.height, 0),
            }
        }
    }

    #[test]
    fn test_get_ancestor_matches_parent_walk() {
        let mut tree = BlockTree::new();
        let ids = chain(&mut tree, 200);
        for &id in ids.iter().step_by(7) {
            let height = tree.node(id).height;
            for target in 0..=height {
                assert_eq!(
                    tree.get_ancestor(id, target),
                    Some(walk_parents(&tree, id, height - target))
                );
            }
        }
    }

    #[test]
    fn test_get_ancestor_out_of_range() {
        let mut tree = BlockTree::new();
        let ids = chain(&mut tree, 5);
        assert_eq!(tree.get_ancestor(ids[2], 3), None);
        assert_eq!(tree.get_ancestor(ids[2], 2), Some(ids[2]));
    }

    #[test]
    fn test_mark_failed_propagates_to_descendants() {
        let mut tree = BlockTree::new();
        let ids = chain(&mut tree, 5);
        let fork = tree.insert(&header(tree.node(ids[1]).hash, 77), U256::one()).unwrap();

        assert_eq!(tree.mark_failed(ids[2]), 2);
        assert!(tree.node(ids[2]).status.has(BlockStatus::FAILED_VALID));
        assert!(tree.node(ids[3]).status.has(BlockStatus::FAILED_CHILD));
        assert!(tree.node(ids[4]).status.has(BlockStatus::FAILED_CHILD));
        assert!(!tree.node(ids[1]).is_failed());
        assert!(!tree.node(fork).is_failed());

        // Children indexed later inherit the failure
        let late = tree.insert(&header(tree.node(ids[4]).hash, 78), U256::one()).unwrap();
        assert!(tree.node(late).status.has(BlockStatus::FAILED_CHILD));
        assert!(!tree.raise_validity(late, BlockValidity::Tree));
    }

    #[test]
    fn test_set_block_data_fills_chain_tx() {
        let mut tree = BlockTree::new();
        let ids = chain(&mut tree, 3);

        tree.set_block_data(ids[1], DiskBlockPos::new(0, 500), 4).unwrap();
        assert_eq!(tree.node(ids[1]).chain_tx, 0);

        tree.set_block_data(ids[0], DiskBlockPos::new(0, 0), 1).unwrap();
        assert_eq!(tree.node(ids[0]).chain_tx, 1);
        assert_eq!(tree.node(ids[1]).chain_tx, 5);
        assert_eq!(tree.node(ids[2]).chain_tx, 0);
        assert_eq!(tree.node(ids[1]).block_pos(), DiskBlockPos::new(0, 500));
    }

    #[test]
    fn test_block_header_reconstruction() {
        let mut tree = BlockTree::new();
        let ids = chain(&mut tree, 3);
        let rebuilt = tree.block_header(ids[2]);
        assert_eq!(rebuilt.hash(), tree.node(ids[2]).hash);
        assert_eq!(rebuilt.prev_block_hash, tree.node(ids[1]).hash);
    }

    #[test]
    fn test_median_time_past() {
        let mut tree = BlockTree::new();
        let ids = chain(&mut tree, 20);
        // Times are 1_600_000_000 + height; median of the last 11 is height - 5
        assert_eq!(tree.median_time_past(ids[19], 11), 1_600_000_014);
        assert_eq!(tree.median_time_past(ids[2], 11), 1_600_000_001);
        assert_eq!(tree.median_time_past(ids[7], 0), 1_600_000_007);
        assert_eq!(tree.median_time_past(ids[7], 1), 1_600_000_007);
    }

    #[test]
    fn test_super_majority() {
        let mut tree = BlockTree::new();
        let mut prev = NULL_HASH;
        let mut tip = None;
        for i in 0..10u32 {
            let mut h = header(prev, i);
            h.version = if i >= 4 { 2 } else { 1 };
            let id = tree.insert(&h, U256::one()).unwrap();
            prev = tree.node(id).hash;
            tip = Some(id);
        }
        assert!(tree.is_super_majority(2, tip, 6, 10));
        assert!(!tree.is_super_majority(2, tip, 7, 10));
        assert!(!tree.is_super_majority(2, tip, 6, 5));
        assert!(!tree.is_super_majority(2, None, 1, 10));
    }

    #[test]
    fn test_last_common_ancestor_and_work_order() {
        let mut tree = BlockTree::new();
        let ids = chain(&mut tree, 4);
        let fork = tree.insert(&header(tree.node(ids[1]).hash, 50), U256::one()).unwrap();
        assert_eq!(tree.last_common_ancestor(ids[3], fork), Some(ids[1]));
        assert_eq!(tree.last_common_ancestor(ids[3], ids[2]), Some(ids[2]));

        // fork and ids[2] both sit at height 2 with equal work; ids[2] came first
        assert_eq!(tree.work_order(ids[2], fork), Ordering::Greater);
        assert_eq!(tree.work_order(ids[3], fork), Ordering::Greater);
        assert_eq!(tree.work_order(fork, ids[3]), Ordering::Less);
    }
}
