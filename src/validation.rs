//! Validation outcomes and the per-attempt validation state
//!
//! Rule checks return [`CheckResult`]: either the success value or a
//! [`RuleViolation`] describing why the entity was rejected and how much the
//! provider should be penalised. [`ValidationState`] accumulates those
//! violations for a single validation attempt, together with local errors
//! that are not attributable to any peer.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::REJECT_INVALID;

/// Why a transaction was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TxValidationResult {
    #[default]
    Unset,
    /// Violates a consensus rule
    Consensus,
    InputsNotStandard,
    NotStandard,
    /// Spends an output that is unknown or already spent; may become valid later
    MissingInputs,
    /// Spends an immature coinbase; may become valid later
    PrematureSpend,
    WitnessMutated,
    WitnessStripped,
    Conflict,
    MempoolPolicy,
    NoMempool,
    Reconsiderable,
    Unknown,
    InvalidFormat,
    DuplicateInputs,
    NegativeOutput,
    OutputSumOverflow,
    InvalidSignature,
}

impl fmt::Display for TxValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxValidationResult::Unset => "unset",
            TxValidationResult::Consensus => "consensus",
            TxValidationResult::InputsNotStandard => "inputs-not-standard",
            TxValidationResult::NotStandard => "not-standard",
            TxValidationResult::MissingInputs => "missing-inputs",
            TxValidationResult::PrematureSpend => "premature-spend",
            TxValidationResult::WitnessMutated => "witness-mutated",
            TxValidationResult::WitnessStripped => "witness-stripped",
            TxValidationResult::Conflict => "conflict",
            TxValidationResult::MempoolPolicy => "mempool-policy",
            TxValidationResult::NoMempool => "no-mempool",
            TxValidationResult::Reconsiderable => "reconsiderable",
            TxValidationResult::Unknown => "unknown",
            TxValidationResult::InvalidFormat => "invalid-format",
            TxValidationResult::DuplicateInputs => "duplicate-inputs",
            TxValidationResult::NegativeOutput => "negative-output",
            TxValidationResult::OutputSumOverflow => "output-sum-overflow",
            TxValidationResult::InvalidSignature => "invalid-signature",
        };
        f.write_str(s)
    }
}

/// Why a block (or header) was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlockValidationResult {
    #[default]
    Unset,
    /// Violates a consensus rule not covered by a more specific outcome
    Consensus,
    /// Previously seen and found invalid
    CachedInvalid,
    InvalidHeader,
    /// Body does not match what the header commits to, e.g. duplicated merkle leaves
    Mutated,
    MissingPrev,
    InvalidPrev,
    TimeFuture,
    HeaderLowWork,
    InvalidMerkle,
    TooBig,
    InvalidCoinbase,
    DuplicateTx,
    InvalidTx,
}

impl fmt::Display for BlockValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockValidationResult::Unset => "unset",
            BlockValidationResult::Consensus => "consensus",
            BlockValidationResult::CachedInvalid => "cached-invalid",
            BlockValidationResult::InvalidHeader => "invalid-header",
            BlockValidationResult::Mutated => "mutated",
            BlockValidationResult::MissingPrev => "missing-prev",
            BlockValidationResult::InvalidPrev => "invalid-prev",
            BlockValidationResult::TimeFuture => "time-future",
            BlockValidationResult::HeaderLowWork => "header-low-work",
            BlockValidationResult::InvalidMerkle => "invalid-merkle",
            BlockValidationResult::TooBig => "too-big",
            BlockValidationResult::InvalidCoinbase => "invalid-coinbase",
            BlockValidationResult::DuplicateTx => "duplicate-tx",
            BlockValidationResult::InvalidTx => "invalid-tx",
        };
        f.write_str(s)
    }
}

/// A failed rule check: what failed, why, and the advisory misbehavior score
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reject_reason} (DoS {dos})")]
pub struct RuleViolation {
    pub dos: u32,
    pub reject_code: u8,
    pub reject_reason: String,
    pub debug_message: String,
    pub corruption_possible: bool,
    pub tx_result: TxValidationResult,
    pub block_result: BlockValidationResult,
}

impl RuleViolation {
    fn new(dos: u32, reject_reason: &str) -> Self {
        RuleViolation {
            dos,
            reject_code: REJECT_INVALID,
            reject_reason: reject_reason.to_string(),
            debug_message: String::new(),
            corruption_possible: false,
            tx_result: TxValidationResult::Unset,
            block_result: BlockValidationResult::Unset,
        }
    }

    /// A transaction-level violation
    pub fn tx(result: TxValidationResult, dos: u32, reject_reason: &str) -> Self {
        RuleViolation { tx_result: result, ..Self::new(dos, reject_reason) }
    }

    /// A block-level violation
    pub fn block(result: BlockValidationResult, dos: u32, reject_reason: &str) -> Self {
        RuleViolation { block_result: result, ..Self::new(dos, reject_reason) }
    }

    pub fn with_debug(mut self, message: impl Into<String>) -> Self {
        self.debug_message = message.into();
        self
    }

    pub fn with_reject_code(mut self, code: u8) -> Self {
        self.reject_code = code;
        self
    }

    /// The data may have been damaged in transit rather than crafted; the
    /// block must not be cached as permanently invalid.
    pub fn with_corruption_possible(mut self) -> Self {
        self.corruption_possible = true;
        self
    }

    /// Attribute a transaction failure to the block that contains it.
    pub fn in_block(mut self) -> Self {
        self.block_result = BlockValidationResult::InvalidTx;
        self
    }

    /// Data that may become acceptable later and should not count as malicious
    pub fn is_transient(&self) -> bool {
        matches!(
            self.tx_result,
            TxValidationResult::MissingInputs | TxValidationResult::PrematureSpend
        ) || self.block_result == BlockValidationResult::TimeFuture
    }
}

/// Result type returned by every rule check
pub type CheckResult<T = ()> = std::result::Result<T, RuleViolation>;

/// Terminal mode of a validation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValidationMode {
    #[default]
    Valid,
    /// A peer-attributable rule violation was recorded
    Invalid,
    /// A local fault was recorded; cannot be overwritten by a later violation
    Error,
}

/// Outcome accumulator for one validation attempt. Never shared between
/// concurrent attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationState {
    mode: ValidationMode,
    dos: u32,
    reject_code: u8,
    reject_reason: String,
    debug_message: String,
    corruption_possible: bool,
    tx_result: TxValidationResult,
    block_result: BlockValidationResult,
}

impl ValidationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rule violation with misbehavior score `level`. Always returns
    /// false so callers can `return state.dos(...)`.
    pub fn dos(
        &mut self,
        level: u32,
        reject_code: u8,
        reject_reason: &str,
        corruption_possible: bool,
        debug_message: &str,
    ) -> bool {
        if self.mode == ValidationMode::Error {
            return false;
        }
        self.dos = self.dos.saturating_add(level);
        self.mode = ValidationMode::Invalid;
        self.reject_code = reject_code;
        self.reject_reason = reject_reason.to_string();
        self.corruption_possible = corruption_possible;
        self.debug_message = debug_message.to_string();
        tracing::debug!(
            dos = level,
            total_dos = self.dos,
            reason = reject_reason,
            debug = debug_message,
            "validation rule violated"
        );
        false
    }

    /// Record a violation that carries no misbehavior score
    pub fn invalid(&mut self, reject_code: u8, reject_reason: &str, debug_message: &str) -> bool {
        self.dos(0, reject_code, reject_reason, false, debug_message)
    }

    /// Record a local error. The first recorded reason is kept.
    pub fn error(&mut self, reason: &str) -> bool {
        if self.mode == ValidationMode::Valid {
            self.reject_reason = reason.to_string();
        }
        self.mode = ValidationMode::Error;
        tracing::error!(reason, "validation error");
        false
    }

    /// Record a [`RuleViolation`], including its outcome classification
    pub fn apply(&mut self, violation: &RuleViolation) -> bool {
        if violation.tx_result != TxValidationResult::Unset {
            self.tx_result = violation.tx_result;
        }
        if violation.block_result != BlockValidationResult::Unset {
            self.block_result = violation.block_result;
        }
        self.dos(
            violation.dos,
            violation.reject_code,
            &violation.reject_reason,
            violation.corruption_possible,
            &violation.debug_message,
        )
    }

    /// Fold a check result into this state, returning whether it passed
    pub fn check<T>(&mut self, result: CheckResult<T>) -> bool {
        self.check_value(result).is_some()
    }

    /// Fold a check result into this state, keeping the success value
    pub fn check_value<T>(&mut self, result: CheckResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(violation) => {
                self.apply(&violation);
                None
            }
        }
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    pub fn is_valid(&self) -> bool {
        self.mode == ValidationMode::Valid
    }

    pub fn is_invalid(&self) -> bool {
        self.mode == ValidationMode::Invalid
    }

    pub fn is_error(&self) -> bool {
        self.mode == ValidationMode::Error
    }

    /// Accumulated misbehavior score, if the state is invalid
    pub fn invalid_score(&self) -> Option<u32> {
        if self.is_invalid() {
            Some(self.dos)
        } else {
            None
        }
    }

    pub fn dos_score(&self) -> u32 {
        self.dos
    }

    pub fn corruption_possible(&self) -> bool {
        self.corruption_possible
    }

    pub fn set_corruption_possible(&mut self) {
        self.corruption_possible = true;
    }

    pub fn reject_code(&self) -> u8 {
        self.reject_code
    }

    pub fn reject_reason(&self) -> &str {
        &self.reject_reason
    }

    pub fn debug_message(&self) -> &str {
        &self.debug_message
    }

    pub fn set_tx_result(&mut self, result: TxValidationResult) {
        self.tx_result = result;
    }

    pub fn set_block_result(&mut self, result: BlockValidationResult) {
        self.block_result = result;
    }

    pub fn tx_result(&self) -> TxValidationResult {
        self.tx_result
    }

    pub fn block_result(&self) -> BlockValidationResult {
        self.block_result
    }
}
