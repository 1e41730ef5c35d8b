//! Protocol constants. Network-tunable values live in [`crate::params::ChainParams`].

/// Satoshis per coin
pub const COIN: i64 = 100_000_000;

/// Maximum money supply: 21,000,000 coins in satoshis
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// Maximum serialized block size (legacy rule)
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Maximum legacy signature operations per block
pub const MAX_BLOCK_SIGOPS: usize = MAX_BLOCK_SIZE / 50;

/// Coinbase outputs may only be spent after this many confirmations
pub const COINBASE_MATURITY: u64 = 100;

/// How far a header timestamp may run ahead of adjusted time, in seconds
pub const MAX_FUTURE_BLOCK_TIME: i64 = 2 * 60 * 60;

/// Number of ancestors sampled for median-time-past
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Coinbase unlocking script length bounds
pub const MIN_COINBASE_SCRIPT_SIZE: usize = 2;
pub const MAX_COINBASE_SCRIPT_SIZE: usize = 100;

/// Easiest allowed proof-of-work target, compact form
pub const POW_LIMIT_BITS: u32 = 0x1d00ffff;

/// Locator entries collected at stride 1 before the stride starts doubling
pub const LOCATOR_DENSE_ENTRIES: usize = 10;

/// Client version written at the front of persisted index records
pub const CLIENT_VERSION: u64 = 1_00_00_00;

/// Reject codes carried in validation outcomes
pub const REJECT_INVALID: u8 = 0x10;
pub const REJECT_OBSOLETE: u8 = 0x11;
pub const REJECT_DUPLICATE: u8 = 0x12;

/// Whether an amount lies in the valid money range
pub fn money_range(value: i64) -> bool {
    (0..=MAX_MONEY).contains(&value)
}
