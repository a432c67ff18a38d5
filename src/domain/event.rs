//! On-chain trade event as emitted by the bonding-curve contract.

use serde::{Deserialize, Serialize};

use super::{Address, Asset, Side};

/// One trade observed in the contract's event log.
///
/// `wei` is the total cost of the trade for a buy and the total proceeds for
/// a sell, in the chain's smallest unit. `supply` is the asset's share supply
/// after the trade was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub block_number: u64,
    pub tx_hash: String,
    pub trader: Address,
    pub asset: Asset,
    pub side: Side,
    pub quantity: u64,
    #[serde(with = "super::u128_string")]
    pub wei: u128,
    pub supply: u64,
}

impl TradeEvent {
    /// Wei per share, rounded down. Zero-quantity events yield zero.
    pub fn unit_wei(&self) -> u128 {
        if self.quantity == 0 {
            0
        } else {
            self.wei / self.quantity as u128
        }
    }
}
