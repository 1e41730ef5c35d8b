//! Block and header rule checks

use std::collections::HashSet;

use crate::block_index::NodeId;
use crate::block_tree::BlockTree;
use crate::clock::TimeSource;
use crate::constants::REJECT_OBSOLETE;
use crate::merkle::block_merkle_root;
use crate::params::ChainParams;
use crate::pow::{check_proof_of_work, PowHasher};
use crate::script::transaction_legacy_sigops;
use crate::transaction::check_transaction;
use crate::types::*;
use crate::validation::{BlockValidationResult, CheckResult, RuleViolation};

fn violation(result: BlockValidationResult, dos: u32, reason: &str) -> RuleViolation {
    RuleViolation::block(result, dos, reason)
}

fn check_header_pow(header: &BlockHeader, params: &ChainParams, pow: &dyn PowHasher) -> CheckResult {
    if params.check_pow && !check_proof_of_work(&pow.pow_hash(header), header.bits, params.pow_limit_bits) {
        return Err(violation(BlockValidationResult::InvalidHeader, 50, "high-hash")
            .with_debug("proof of work failed"));
    }
    Ok(())
}

/// CheckBlockHeader: checks that need nothing but the header and a clock
///
/// 1. the proof-of-work hash meets the claimed target
/// 2. the timestamp is at most `max_future_block_time` past adjusted time
pub fn check_block_header(
    header: &BlockHeader,
    params: &ChainParams,
    pow: &dyn PowHasher,
    clock: &dyn TimeSource,
) -> CheckResult {
    check_header_pow(header, params, pow)?;

    if i64::from(header.timestamp) > clock.adjusted_time() + params.max_future_block_time {
        return Err(violation(BlockValidationResult::TimeFuture, 0, "time-too-new")
            .with_debug("block timestamp too far in the future"));
    }
    Ok(())
}

/// ContextualCheckBlockHeader: checks against the header's parent in `tree`
///
/// 1. the timestamp is after the median time past of the parent
/// 2. the version is not outdated once a supermajority of the window ending
///    at the parent has upgraded
pub fn contextual_check_block_header(
    header: &BlockHeader,
    tree: &BlockTree,
    parent: NodeId,
    params: &ChainParams,
) -> CheckResult {
    let median = tree.median_time_past(parent, params.median_time_span);
    if i64::from(header.timestamp) <= median {
        return Err(violation(BlockValidationResult::Consensus, 100, "time-too-old")
            .with_debug(format!("block time {} <= median time past {}", header.timestamp, median)));
    }

    let sm = &params.super_majority;
    for upgraded in 2..=3 {
        if header.version < upgraded
            && tree.is_super_majority(upgraded, Some(parent), sm.reject_outdated, sm.window)
        {
            return Err(violation(BlockValidationResult::Consensus, 100, "bad-version")
                .with_reject_code(REJECT_OBSOLETE)
                .with_debug(format!("rejected nVersion={} block", header.version)));
        }
    }
    Ok(())
}

/// CheckBlock: context-free checks of a full block
///
/// 1. proof of work
/// 2. the merkle root over the transaction ids matches the header, and the
///    transaction list is not a malleated copy of a shorter one
/// 3. no duplicate transaction ids
/// 4. the first transaction, and only the first, is a coinbase
/// 5. every transaction passes [`check_transaction`]
/// 6. legacy signature operations within `max_block_sigops`
/// 7. transaction count and serialized size within `max_block_size`
pub fn check_block(block: &Block, params: &ChainParams, pow: &dyn PowHasher) -> CheckResult {
    check_header_pow(&block.header, params, pow)?;

    let merkle = block_merkle_root(block);
    if merkle.root != block.header.merkle_root {
        // The header does not describe this body; the genuine body may still arrive
        return Err(violation(BlockValidationResult::InvalidMerkle, 100, "bad-merkleroot")
            .with_corruption_possible()
            .with_debug("hashMerkleRoot mismatch"));
    }
    if merkle.mutated {
        return Err(violation(BlockValidationResult::Mutated, 100, "bad-txns-duplicate")
            .with_corruption_possible()
            .with_debug("duplicate transaction"));
    }

    let mut txids = HashSet::with_capacity(block.transactions.len());
    if !block.transactions.iter().all(|tx| txids.insert(tx.txid())) {
        return Err(violation(BlockValidationResult::DuplicateTx, 100, "bad-txns-duplicate")
            .with_debug("duplicate transaction"));
    }

    match block.transactions.first() {
        Some(first) if first.is_coinbase() => {}
        _ => {
            return Err(violation(BlockValidationResult::InvalidCoinbase, 100, "bad-cb-missing")
                .with_debug("first tx is not coinbase"));
        }
    }
    if block.transactions.iter().skip(1).any(Transaction::is_coinbase) {
        return Err(violation(BlockValidationResult::InvalidCoinbase, 100, "bad-cb-multiple")
            .with_debug("more than one coinbase"));
    }

    for tx in &block.transactions {
        check_transaction(tx, params).map_err(RuleViolation::in_block)?;
    }

    let sigops: usize = block.transactions.iter().map(transaction_legacy_sigops).sum();
    if sigops > params.max_block_sigops {
        return Err(violation(BlockValidationResult::Consensus, 100, "bad-blk-sigops")
            .with_debug("too many checksigs"));
    }

    if block.transactions.len() > params.max_block_size || block.serialized_size() > params.max_block_size {
        return Err(violation(BlockValidationResult::TooBig, 100, "bad-blk-length")
            .with_debug("size limits failed"));
    }

    Ok(())
}
