//! Transaction rule checks: context-free structure, inputs against an
//! unspent-output view, and script verification through an external verifier

use std::collections::HashSet;

use crate::coins::CoinsView;
use crate::constants::money_range;
use crate::params::ChainParams;
use crate::script::ScriptVerifier;
use crate::types::*;
use crate::validation::{CheckResult, RuleViolation, TxValidationResult};

fn violation(result: TxValidationResult, dos: u32, reason: &str) -> RuleViolation {
    RuleViolation::tx(result, dos, reason)
}

/// CheckTransaction: structure checks that need no context
///
/// A transaction is structurally valid if and only if:
/// 1. it has at least one input and at least one output
/// 2. its serialized size is within `max_tx_size`
/// 3. every output value is in `[0, max_money]` and the running sum of
///    outputs stays in the money range
/// 4. no two inputs spend the same outpoint
/// 5. a coinbase's unlocking script is 2..=100 bytes; any other
///    transaction spends no null outpoint
pub fn check_transaction(tx: &Transaction, params: &ChainParams) -> CheckResult {
    if tx.inputs.is_empty() {
        return Err(violation(TxValidationResult::InvalidFormat, 10, "bad-txns-vin-empty"));
    }
    if tx.outputs.is_empty() {
        return Err(violation(TxValidationResult::InvalidFormat, 10, "bad-txns-vout-empty"));
    }

    let size = tx.serialized_size();
    if size > params.max_tx_size {
        return Err(violation(TxValidationResult::Consensus, 100, "bad-txns-oversize")
            .with_debug(format!("size {} exceeds {}", size, params.max_tx_size)));
    }

    let mut value_out: Integer = 0;
    for (i, output) in tx.outputs.iter().enumerate() {
        if output.value < 0 {
            return Err(violation(TxValidationResult::NegativeOutput, 100, "bad-txns-vout-negative")
                .with_debug(format!("output {} value {}", i, output.value)));
        }
        if output.value > params.max_money {
            return Err(violation(TxValidationResult::OutputSumOverflow, 100, "bad-txns-vout-toolarge")
                .with_debug(format!("output {} value {}", i, output.value)));
        }
        value_out += output.value;
        if !money_range(value_out) || value_out > params.max_money {
            return Err(violation(
                TxValidationResult::OutputSumOverflow,
                100,
                "bad-txns-txouttotal-toolarge",
            ));
        }
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.prevout) {
            return Err(violation(TxValidationResult::DuplicateInputs, 100, "bad-txns-inputs-duplicate"));
        }
    }

    if tx.is_coinbase() {
        let len = tx.inputs[0].script_sig.len();
        if len < params.min_coinbase_script_size || len > params.max_coinbase_script_size {
            return Err(violation(TxValidationResult::Consensus, 100, "bad-cb-length")
                .with_debug(format!("coinbase script length {}", len)));
        }
    } else if tx.inputs.iter().any(|input| input.prevout.is_null()) {
        return Err(violation(TxValidationResult::Consensus, 10, "bad-txns-prevout-null"));
    }

    Ok(())
}

/// CheckTxInputs: value checks against the unspent-output view at `spend_height`
///
/// Returns the fee. Coinbase transactions have no inputs to check and pay
/// no fee.
/// 1. every input refers to an unspent output in `view`
/// 2. a coinbase output is only spent `coinbase_maturity` blocks after it was created
/// 3. each input value and the running input sum stay in the money range
/// 4. inputs cover outputs, and the fee is in the money range
pub fn check_tx_inputs(
    tx: &Transaction,
    view: &dyn CoinsView,
    spend_height: Natural,
    params: &ChainParams,
) -> CheckResult<Integer> {
    if tx.is_coinbase() {
        return Ok(0);
    }

    let missing = || {
        violation(TxValidationResult::MissingInputs, 0, "bad-txns-inputs-missingorspent")
            .with_debug(format!("{}: inputs missing/spent", hash_to_hex(&tx.txid())))
    };
    if !view.have_inputs(tx) {
        return Err(missing());
    }

    let mut value_in: Integer = 0;
    for input in &tx.inputs {
        let coin = view.access_coin(&input.prevout).ok_or_else(missing)?;

        if coin.is_coinbase {
            let depth = spend_height.saturating_sub(coin.height);
            if spend_height < coin.height || depth < params.coinbase_maturity {
                return Err(violation(
                    TxValidationResult::PrematureSpend,
                    0,
                    "bad-txns-premature-spend-of-coinbase",
                )
                .with_debug(format!("tried to spend coinbase at depth {}", depth)));
            }
        }

        let value = coin.output.value;
        value_in = value_in.checked_add(value).unwrap_or(Integer::MAX);
        if !money_range(value) || !money_range(value_in) {
            return Err(violation(TxValidationResult::Consensus, 100, "bad-txns-inputvalues-outofrange"));
        }
    }

    let value_out = tx.value_out();
    if value_in < value_out {
        return Err(violation(TxValidationResult::Consensus, 100, "bad-txns-in-belowout")
            .with_debug(format!("value in ({}) < value out ({})", value_in, value_out)));
    }

    let fee = value_in
        .checked_sub(value_out)
        .ok_or_else(|| violation(TxValidationResult::Consensus, 100, "bad-txns-fee-outofrange"))?;
    if fee < 0 {
        return Err(violation(TxValidationResult::Consensus, 100, "bad-txns-fee-negative"));
    }
    if !money_range(fee) {
        return Err(violation(TxValidationResult::Consensus, 100, "bad-txns-fee-outofrange"));
    }
    Ok(fee)
}

/// Run `verifier` over every input of a non-coinbase transaction
pub fn check_input_scripts(
    tx: &Transaction,
    view: &dyn CoinsView,
    verifier: &dyn ScriptVerifier,
    flags: u32,
) -> CheckResult {
    if tx.is_coinbase() {
        return Ok(());
    }
    for (i, input) in tx.inputs.iter().enumerate() {
        let coin = view.access_coin(&input.prevout).ok_or_else(|| {
            violation(TxValidationResult::MissingInputs, 0, "bad-txns-inputs-missingorspent")
        })?;
        if !verifier.verify(&input.script_sig, &coin.output.script_pubkey, tx, i, flags) {
            return Err(violation(
                TxValidationResult::InvalidSignature,
                100,
                "mandatory-script-verify-flag-failed",
            )
            .with_debug(format!("input {} of {}", i, hash_to_hex(&tx.txid()))));
        }
    }
    Ok(())
}
