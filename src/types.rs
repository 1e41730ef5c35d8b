//! Core ledger types consumed by the block index and the rule checks

use serde::{Deserialize, Serialize};

use crate::serialize;

/// Hash type: 256-bit hash, stored in internal (little-endian) byte order
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Natural number type (heights, counts)
pub type Natural = u64;

/// Integer type (monetary amounts)
pub type Integer = i64;

/// The all-zero hash, used as "no previous block" and in null outpoints
pub const NULL_HASH: Hash = [0u8; 32];

/// Render a hash the way block explorers do: byte-reversed hex.
pub fn hash_to_hex(hash: &Hash) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

/// OutPoint: reference to output `index` of transaction `hash`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    /// The outpoint carried by a coinbase input
    pub fn null() -> Self {
        OutPoint { hash: NULL_HASH, index: u32::MAX }
    }

    pub fn is_null(&self) -> bool {
        self.hash == NULL_HASH && self.index == u32::MAX
    }
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub script_sig: ByteString,
    pub sequence: u32,
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: Integer,
    pub script_pubkey: ByteString,
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// A coinbase has exactly one input, and that input spends the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Transaction identifier: double SHA-256 of the canonical encoding
    pub fn txid(&self) -> Hash {
        serialize::sha256d(&serialize::serialize_transaction(self))
    }

    /// Sum of output values, saturating so that callers range-check the result.
    pub fn value_out(&self) -> Integer {
        self.outputs
            .iter()
            .fold(0i64, |acc, output| acc.saturating_add(output.value))
    }

    pub fn serialized_size(&self) -> usize {
        serialize::serialize_transaction(self).len()
    }
}

/// Block header. Immutable once built; its hash is a pure function of the six fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Content hash: double SHA-256 of the 80-byte header encoding
    pub fn hash(&self) -> Hash {
        serialize::sha256d(&serialize::serialize_header(self))
    }

    /// Headers with a null previous hash are genesis candidates.
    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash == NULL_HASH
    }
}

/// Block: header plus ordered transaction list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn serialized_size(&self) -> usize {
        serialize::block_serialized_size(self)
    }
}
