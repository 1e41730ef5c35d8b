//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::{Arc, Once};

use chain_index::clock::FixedTimeSource;
use chain_index::merkle::block_merkle_root;
use chain_index::pow::{check_proof_of_work, PowHasher, Sha256dPow};
use chain_index::*;
use primitive_types::U256;

pub const T0: u32 = 1_600_000_000;
pub const REGTEST_BITS: u32 = 0x207fffff;

static TRACING: Once = Once::new();

/// Install a test subscriber once; filter with RUST_LOG
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Regtest validator with a clock far enough ahead of every fixture block
pub fn regtest_validator() -> ConsensusValidator {
    ConsensusValidator::new(Arc::new(ChainParams::regtest()))
        .with_time_source(Arc::new(FixedTimeSource(i64::from(T0) + 100_000_000)))
}

pub fn coinbase(height: u32, value: Integer) -> Transaction {
    let mut script_sig = vec![0x04];
    script_sig.extend_from_slice(&height.to_le_bytes());
    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout: OutPoint::null(),
            script_sig,
            sequence: 0xffffffff,
        }],
        outputs: vec![TransactionOutput { value, script_pubkey: vec![0x51] }],
        lock_time: 0,
    }
}

/// Grind the nonce until the header meets its own target
pub fn grind(header: &mut BlockHeader) {
    while !check_proof_of_work(&Sha256dPow.pow_hash(header), header.bits, REGTEST_BITS) {
        header.nonce += 1;
    }
}

/// A mined regtest block on `prev` carrying a coinbase plus `extra`
pub fn mine_block(prev: Hash, height: u32, extra: Vec<Transaction>) -> Block {
    let mut transactions = vec![coinbase(height, 50 * COIN)];
    transactions.extend(extra);
    let mut block = Block {
        header: BlockHeader {
            version: 1,
            prev_block_hash: prev,
            merkle_root: NULL_HASH,
            timestamp: T0 + height * 600,
            bits: REGTEST_BITS,
            nonce: 0,
        },
        transactions,
    };
    block.header.merkle_root = block_merkle_root(&block).root;
    grind(&mut block.header);
    block
}

/// Unchecked header on `prev`; `salt` keeps sibling branches distinct
pub fn raw_header(prev: Hash, height: u32, salt: u32) -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_block_hash: prev,
        merkle_root: [0; 32],
        timestamp: T0 + height * 600,
        bits: REGTEST_BITS,
        nonce: salt.wrapping_mul(1_000_003).wrapping_add(height),
    }
}

/// Extend `tree` from `from` (genesis when `None`) by `len` nodes of unit work
pub fn extend(tree: &mut BlockTree, from: Option<NodeId>, len: u32, salt: u32) -> Vec<NodeId> {
    let (mut prev, start) = match from {
        Some(id) => (tree.node(id).hash, tree.node(id).height as u32 + 1),
        None => (NULL_HASH, 0),
    };
    let mut ids = Vec::new();
    for height in start..start + len {
        let id = tree
            .insert(&raw_header(prev, height, salt), U256::one())
            .expect("fixture header links");
        prev = tree.node(id).hash;
        ids.push(id);
    }
    ids
}

/// Follow parent links `steps` times
pub fn walk_parents(tree: &BlockTree, mut id: NodeId, steps: u64) -> NodeId {
    for _ in 0..steps {
        id = tree.node(id).parent.expect("walk stays above genesis");
    }
    id
}
