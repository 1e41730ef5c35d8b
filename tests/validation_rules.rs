//! Rule checks driven through the validator and the shared index

mod common;

use std::sync::Arc;
use std::thread;

use chain_index::coins::{CoinsCache, CoinsView};
use chain_index::*;
use common::*;

fn spend(prevouts: &[OutPoint], value: Integer) -> Transaction {
    Transaction {
        version: 1,
        inputs: prevouts
            .iter()
            .map(|&prevout| TransactionInput { prevout, script_sig: vec![0x51], sequence: 0xffffffff })
            .collect(),
        outputs: vec![TransactionOutput { value, script_pubkey: vec![0x51] }],
        lock_time: 0,
    }
}

#[test]
fn duplicate_inputs_score_100() {
    init_tracing();
    let validator = regtest_validator();
    let prevout = OutPoint { hash: [9; 32], index: 1 };
    let tx = spend(&[prevout, prevout], 1_000);

    let mut state = ValidationState::new();
    assert!(!validator.check_transaction(&tx, &mut state));
    assert_eq!(state.tx_result(), TxValidationResult::DuplicateInputs);
    assert_eq!(state.invalid_score(), Some(100));
    assert_eq!(state.reject_reason(), "bad-txns-inputs-duplicate");
}

#[test]
fn coinbase_maturity_boundary() {
    let validator = regtest_validator();
    let maturity = validator.params().coinbase_maturity;
    let created_at = 1_000;

    let source = coinbase(created_at as u32, 50 * COIN);
    let mut view = CoinsCache::new();
    view.apply_transaction(&source, created_at);
    let outpoint = OutPoint { hash: source.txid(), index: 0 };
    assert!(view.access_coin(&outpoint).map_or(false, |coin| coin.is_coinbase));

    let tx = spend(&[outpoint], 49 * COIN);

    let mut state = ValidationState::new();
    assert!(!validator.check_tx_inputs(&tx, &view, created_at + maturity - 1, &mut state));
    assert_eq!(state.tx_result(), TxValidationResult::PrematureSpend);
    assert_eq!(state.invalid_score(), Some(0));

    let mut state = ValidationState::new();
    assert!(validator.check_tx_inputs(&tx, &view, created_at + maturity, &mut state));
    assert!(state.is_valid());
}

#[test]
fn merkle_mismatch_is_invalid_merkle_even_with_valid_transactions() {
    let validator = regtest_validator();
    let mut block = mine_block(NULL_HASH, 0, vec![spend(&[OutPoint { hash: [3; 32], index: 0 }], 10)]);

    let mut state = ValidationState::new();
    assert!(validator.check_block(&block, &mut state));
    for tx in &block.transactions {
        assert!(validator.check_transaction(tx, &mut ValidationState::new()));
    }

    block.header.merkle_root[0] ^= 0xff;
    grind(&mut block.header);
    let mut state = ValidationState::new();
    assert!(!validator.check_block(&block, &mut state));
    assert_eq!(state.block_result(), BlockValidationResult::InvalidMerkle);
    assert_eq!(state.invalid_score(), Some(100));
    assert_eq!(state.reject_reason(), "bad-merkleroot");
}

#[test]
fn substituted_body_does_not_ban_the_genuine_block() -> anyhow::Result<()> {
    let index = ChainIndex::with_validator(regtest_validator());
    let genesis = mine_block(NULL_HASH, 0, vec![]);
    let mut state = ValidationState::new();
    index
        .accept_block(&genesis, DiskBlockPos::new(0, 0), &mut state)
        .ok_or_else(|| anyhow::anyhow!("genesis rejected"))?;

    let genuine = mine_block(genesis.header.hash(), 1, vec![]);
    let tampered = Block { header: genuine.header.clone(), transactions: vec![coinbase(77, 50 * COIN)] };
    let mut state = ValidationState::new();
    assert_eq!(index.accept_block(&tampered, DiskBlockPos::new(0, 200), &mut state), None);
    assert_eq!(state.reject_reason(), "bad-merkleroot");
    assert!(state.corruption_possible());

    let mut state = ValidationState::new();
    let hash = index
        .accept_block(&genuine, DiskBlockPos::new(0, 200), &mut state)
        .ok_or_else(|| anyhow::anyhow!("genuine block rejected: {}", state.reject_reason()))?;
    let node = index.lookup(&hash).ok_or_else(|| anyhow::anyhow!("missing block"))?;
    assert!(!node.is_failed());
    assert!(node.is_valid(BlockValidity::Transactions));
    Ok(())
}

#[test]
fn header_pow_failure_scores_50() {
    let validator = regtest_validator();
    let mut header = mine_block(NULL_HASH, 0, vec![]).header;
    // Step the nonce until the hash misses the target
    while meets_target(&header) {
        header.nonce += 1;
    }
    let mut state = ValidationState::new();
    assert!(!validator.check_block_header(&header, &mut state));
    assert_eq!(state.block_result(), BlockValidationResult::InvalidHeader);
    assert_eq!(state.invalid_score(), Some(50));
}

fn meets_target(header: &BlockHeader) -> bool {
    use chain_index::pow::{check_proof_of_work, PowHasher, Sha256dPow};
    check_proof_of_work(&Sha256dPow.pow_hash(header), header.bits, REGTEST_BITS)
}

#[test]
fn error_state_is_not_overwritten_by_later_violations() {
    let validator = regtest_validator();
    let mut state = ValidationState::new();
    state.error("disk-read-failed");

    let prevout = OutPoint { hash: [9; 32], index: 1 };
    assert!(!validator.check_transaction(&spend(&[prevout, prevout], 1), &mut state));
    assert!(state.is_error());
    assert_eq!(state.dos_score(), 0);
    assert_eq!(state.reject_reason(), "disk-read-failed");
}

#[test]
fn index_accepts_mined_chain_and_reorganizes() -> anyhow::Result<()> {
    init_tracing();
    let index = ChainIndex::with_validator(regtest_validator());

    let mut main = Vec::new();
    let mut prev = NULL_HASH;
    for height in 0..6 {
        let block = mine_block(prev, height, vec![]);
        let mut state = ValidationState::new();
        prev = index
            .accept_block(&block, DiskBlockPos::new(0, height * 1_000), &mut state)
            .ok_or_else(|| anyhow::anyhow!("block {} rejected: {}", height, state.reject_reason()))?;
        main.push(prev);
    }
    index.set_tip(&main[5])?;

    let mut side = Vec::new();
    let mut prev = main[2];
    for height in 3..9 {
        let mut block = mine_block(prev, height, vec![]);
        block.header.timestamp += 1;
        grind(&mut block.header);
        let mut state = ValidationState::new();
        prev = index
            .accept_block_header(&block.header, &mut state)
            .ok_or_else(|| anyhow::anyhow!("header {} rejected", height))?;
        side.push(prev);
    }

    assert_eq!(index.best_header(), Some(side[5]));
    let fork = index.find_fork(&side[5]);
    assert_eq!(fork, Some(main[2]));

    index.set_tip(&side[5])?;
    assert_eq!(index.height(), Some(8));
    assert!(!index.contains(&main[3]));

    let mut state = ValidationState::new();
    assert!(index.validate_chain(1, 1_000, &mut state));
    // The side branch has headers only
    assert!(!index.validate_chain(2, 1_000, &mut state));
    assert_eq!(state.reject_reason(), "chain-invalid-transactions");

    let tip = index.tip().ok_or_else(|| anyhow::anyhow!("no tip"))?;
    assert_eq!(tip.chain_tx, 0);
    let data = index.lookup(&main[5]).ok_or_else(|| anyhow::anyhow!("missing block"))?;
    assert_eq!(data.chain_tx, 6);
    Ok(())
}

#[test]
fn concurrent_readers_see_consistent_tips() {
    let index = Arc::new(ChainIndex::with_validator(regtest_validator()));
    let mut prev = NULL_HASH;
    let mut hashes = Vec::new();
    for height in 0..40 {
        let header = mine_block(prev, height, vec![]).header;
        prev = index.accept_block_header(&header, &mut ValidationState::new()).unwrap();
        hashes.push(prev);
    }
    let hashes = Arc::new(hashes);

    let writer = {
        let index = Arc::clone(&index);
        let hashes = Arc::clone(&hashes);
        thread::spawn(move || {
            for hash in hashes.iter() {
                index.set_tip(hash).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for _ in 0..200 {
                    index.with_read(|tree, chain| {
                        if let Some(tip) = chain.tip() {
                            assert_eq!(Some(tree.node(tip).height), chain.height());
                            assert!(chain.audit(tree, 0, u64::MAX).is_ok());
                        }
                    });
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(index.height(), Some(39));
}
