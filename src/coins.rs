//! Unspent-output view consumed by the input checks

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::*;

/// An unspent output together with where it was created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub output: TransactionOutput,
    pub height: Natural,
    pub is_coinbase: bool,
}

/// Read-only view of the unspent-output set
pub trait CoinsView {
    fn access_coin(&self, outpoint: &OutPoint) -> Option<Coin>;

    /// Every input of `tx` refers to an unspent output in this view
    fn have_inputs(&self, tx: &Transaction) -> bool {
        tx.inputs
            .iter()
            .all(|input| self.access_coin(&input.prevout).is_some())
    }
}

/// In-memory unspent-output set
#[derive(Debug, Clone, Default)]
pub struct CoinsCache {
    coins: HashMap<OutPoint, Coin>,
}

impl CoinsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn add_coin(&mut self, outpoint: OutPoint, coin: Coin) {
        self.coins.insert(outpoint, coin);
    }

    pub fn spend_coin(&mut self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.remove(outpoint)
    }

    /// Spend the inputs of `tx` (unless coinbase) and add its outputs at `height`
    pub fn apply_transaction(&mut self, tx: &Transaction, height: Natural) {
        let is_coinbase = tx.is_coinbase();
        if !is_coinbase {
            for input in &tx.inputs {
                self.coins.remove(&input.prevout);
            }
        }

        let txid = tx.txid();
        for (index, output) in tx.outputs.iter().enumerate() {
            self.coins.insert(
                OutPoint { hash: txid, index: index as u32 },
                Coin { output: output.clone(), height, is_coinbase },
            );
        }
    }
}

impl CoinsView for CoinsCache {
    fn access_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.get(outpoint).cloned()
    }
}
