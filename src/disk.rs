//! Persisted form of block index nodes
//!
//! A [`DiskBlockIndex`] holds only the fields that survive a restart; links
//! between nodes are stored as the previous-block hash and rebuilt on load.

use std::collections::HashMap;

use crate::block_index::{BlockStatus, NodeId};
use crate::block_tree::BlockTree;
use crate::constants::CLIENT_VERSION;
use crate::error::{ConsensusError, Result};
use crate::pow::block_proof;
use crate::serialize::{write_header, write_varint, Reader};
use crate::types::*;

/// One persisted index record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskBlockIndex {
    pub height: Natural,
    pub status: BlockStatus,
    pub tx_count: u32,
    pub file: i32,
    pub data_pos: u32,
    pub undo_pos: u32,
    pub header: BlockHeader,
}

fn varint_u32(reader: &mut Reader<'_>, field: &str) -> Result<u32> {
    let value = reader.read_varint()?;
    u32::try_from(value)
        .map_err(|_| ConsensusError::Serialization(format!("{} out of range: {}", field, value)))
}

impl DiskBlockIndex {
    pub fn from_node(tree: &BlockTree, id: NodeId) -> Self {
        let node = tree.node(id);
        DiskBlockIndex {
            height: node.height,
            status: node.status,
            tx_count: node.tx_count,
            file: node.file,
            data_pos: node.data_pos,
            undo_pos: node.undo_pos,
            header: tree.block_header(id),
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Client version, height, status, tx count, then the file and offsets
    /// present according to the HAVE bits, then the header fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(100);
        write_varint(&mut out, CLIENT_VERSION);
        write_varint(&mut out, self.height);
        write_varint(&mut out, u64::from(self.status.bits()));
        write_varint(&mut out, u64::from(self.tx_count));
        if self.status.has(BlockStatus::HAVE_MASK) {
            // The file index is non-negative whenever a HAVE bit is set
            write_varint(&mut out, self.file.max(0) as u64);
        }
        if self.status.has(BlockStatus::HAVE_DATA) {
            write_varint(&mut out, u64::from(self.data_pos));
        }
        if self.status.has(BlockStatus::HAVE_UNDO) {
            write_varint(&mut out, u64::from(self.undo_pos));
        }
        write_header(&mut out, &self.header);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let _client_version = reader.read_varint()?;
        let height = reader.read_varint()?;
        let status = BlockStatus::from_bits(varint_u32(&mut reader, "status")?);
        let tx_count = varint_u32(&mut reader, "tx count")?;

        let mut file = 0;
        let mut data_pos = 0;
        let mut undo_pos = 0;
        if status.has(BlockStatus::HAVE_MASK) {
            file = i32::try_from(reader.read_varint()?)
                .map_err(|_| ConsensusError::Serialization("file index out of range".to_string()))?;
        }
        if status.has(BlockStatus::HAVE_DATA) {
            data_pos = varint_u32(&mut reader, "data position")?;
        }
        if status.has(BlockStatus::HAVE_UNDO) {
            undo_pos = varint_u32(&mut reader, "undo position")?;
        }
        let header = reader.read_header()?;

        if reader.remaining() != 0 {
            return Err(ConsensusError::Serialization(format!(
                "{} trailing bytes after index record",
                reader.remaining()
            )));
        }
        Ok(DiskBlockIndex { height, status, tx_count, file, data_pos, undo_pos, header })
    }
}

/// Durable storage for index records, keyed by block hash
pub trait BlockIndexStore: Send + Sync {
    /// Write every record, replacing any stored under the same hash
    fn write_batch(&mut self, records: &[DiskBlockIndex]) -> Result<()>;

    fn read_all(&self) -> Result<Vec<DiskBlockIndex>>;
}

/// Store that keeps encoded records in memory
#[derive(Debug, Default)]
pub struct MemoryBlockIndexStore {
    records: HashMap<Hash, Vec<u8>>,
}

impl MemoryBlockIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Raw encoded record, if any
    pub fn raw(&self, hash: &Hash) -> Option<&[u8]> {
        self.records.get(hash).map(Vec::as_slice)
    }
}

impl BlockIndexStore for MemoryBlockIndexStore {
    fn write_batch(&mut self, records: &[DiskBlockIndex]) -> Result<()> {
        for record in records {
            self.records.insert(record.hash(), record.encode());
        }
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<DiskBlockIndex>> {
        self.records.values().map(|bytes| DiskBlockIndex::decode(bytes)).collect()
    }
}

impl BlockTree {
    /// Persist every node of the tree
    pub fn save_to(&self, store: &mut dyn BlockIndexStore) -> Result<usize> {
        let records: Vec<DiskBlockIndex> =
            self.iter().map(|(id, _)| DiskBlockIndex::from_node(self, id)).collect();
        store.write_batch(&records)?;
        tracing::debug!(records = records.len(), "saved block index");
        Ok(records.len())
    }

    /// Rebuild a tree from persisted records. Links, skip pointers, chain
    /// work and chain transaction counts are recomputed.
    ///
    /// Records are indexed by height, then hash, so sequence ids and the
    /// equal-work tie-break they drive do not depend on store order.
    pub fn load_from(store: &dyn BlockIndexStore) -> Result<BlockTree> {
        let mut records = store.read_all()?;
        records.sort_by_cached_key(|record| (record.height, record.hash()));

        let mut tree = BlockTree::new();
        for record in &records {
            let id = tree.insert(&record.header, block_proof(record.header.bits))?;
            let node = tree.node_mut(id).ok_or(ConsensusError::UnknownNode(id.index()))?;
            if node.height != record.height {
                return Err(ConsensusError::Storage(format!(
                    "record {} claims height {} but links at {}",
                    hash_to_hex(&record.hash()),
                    record.height,
                    node.height
                )));
            }
            node.status = record.status;
            node.tx_count = record.tx_count;
            node.file = record.file;
            node.data_pos = record.data_pos;
            node.undo_pos = record.undo_pos;
        }

        // Parents precede children in arena order
        let ids: Vec<NodeId> = tree.iter().map(|(id, _)| id).collect();
        for id in ids {
            let node = tree.node(id);
            if node.tx_count == 0 {
                continue;
            }
            let base = match node.parent {
                None => Some(0),
                Some(parent) => Some(tree.node(parent).chain_tx).filter(|&c| c != 0),
            };
            if let Some(base) = base {
                let tx_count = u64::from(node.tx_count);
                if let Some(node) = tree.node_mut(id) {
                    node.chain_tx = base + tx_count;
                }
            }
        }

        tracing::info!(nodes = tree.len(), "loaded block index");
        Ok(tree)
    }
}
