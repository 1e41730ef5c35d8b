//! Per-network chain parameters
//!
//! Built once at startup and handed by reference to everything that needs
//! them; there is no process-wide "current network".

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{ConsensusError, Result};

/// Version-upgrade supermajority thresholds, counted over the last `window` blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperMajority {
    /// Blocks of the new version start being enforced at this count
    pub enforce_upgrade: u32,
    /// Blocks of older versions are rejected at this count
    pub reject_outdated: u32,
    pub window: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    pub network: String,
    pub coinbase_maturity: u64,
    pub max_future_block_time: i64,
    pub max_block_size: usize,
    pub max_block_sigops: usize,
    pub max_tx_size: usize,
    pub max_money: i64,
    pub min_coinbase_script_size: usize,
    pub max_coinbase_script_size: usize,
    pub median_time_span: usize,
    pub pow_limit_bits: u32,
    /// Test networks may accept headers without checking proof of work
    pub check_pow: bool,
    pub super_majority: SuperMajority,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::main()
    }
}

impl ChainParams {
    pub fn main() -> Self {
        ChainParams {
            network: "main".to_string(),
            coinbase_maturity: COINBASE_MATURITY,
            max_future_block_time: MAX_FUTURE_BLOCK_TIME,
            max_block_size: MAX_BLOCK_SIZE,
            max_block_sigops: MAX_BLOCK_SIGOPS,
            max_tx_size: MAX_BLOCK_SIZE,
            max_money: MAX_MONEY,
            min_coinbase_script_size: MIN_COINBASE_SCRIPT_SIZE,
            max_coinbase_script_size: MAX_COINBASE_SCRIPT_SIZE,
            median_time_span: MEDIAN_TIME_SPAN,
            pow_limit_bits: POW_LIMIT_BITS,
            check_pow: true,
            super_majority: SuperMajority {
                enforce_upgrade: 750,
                reject_outdated: 950,
                window: 1000,
            },
        }
    }

    pub fn testnet() -> Self {
        ChainParams {
            network: "test".to_string(),
            super_majority: SuperMajority {
                enforce_upgrade: 51,
                reject_outdated: 75,
                window: 100,
            },
            ..Self::main()
        }
    }

    /// Regression-test network: trivially easy proof of work
    pub fn regtest() -> Self {
        ChainParams {
            network: "regtest".to_string(),
            pow_limit_bits: 0x207fffff,
            ..Self::main()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let params: ChainParams = serde_json::from_str(json)
            .map_err(|e| ConsensusError::Configuration(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading chain parameters from {}", path.display()))?;
        let params = Self::from_json_str(&json)
            .with_context(|| format!("parsing chain parameters from {}", path.display()))?;
        tracing::info!(network = %params.network, path = %path.display(), "loaded chain parameters");
        Ok(params)
    }

    /// Reject parameter sets that cannot describe a working network
    pub fn validate(&self) -> Result<()> {
        let sm = &self.super_majority;
        if sm.window == 0 || sm.enforce_upgrade > sm.window || sm.reject_outdated > sm.window {
            return Err(ConsensusError::Configuration(format!(
                "supermajority thresholds {}/{} exceed window {}",
                sm.enforce_upgrade, sm.reject_outdated, sm.window
            )));
        }
        if self.min_coinbase_script_size > self.max_coinbase_script_size {
            return Err(ConsensusError::Configuration(format!(
                "coinbase script bounds inverted: {} > {}",
                self.min_coinbase_script_size, self.max_coinbase_script_size
            )));
        }
        if self.median_time_span == 0 {
            return Err(ConsensusError::Configuration("median time span must be positive".to_string()));
        }
        if self.max_money <= 0 {
            return Err(ConsensusError::Configuration("max money must be positive".to_string()));
        }
        if self.max_tx_size > self.max_block_size {
            return Err(ConsensusError::Configuration(format!(
                "max transaction size {} exceeds max block size {}",
                self.max_tx_size, self.max_block_size
            )));
        }
        Ok(())
    }
}
