//! Purchase lots: the unit of position accounting.

use serde::{Deserialize, Serialize};

/// One purchase event's remaining unsold quantity for a (holder, asset) pair.
///
/// Lots are created append-only with non-decreasing purchase block per
/// (holder, asset) sequence and consumed oldest-first on sells. A lot whose
/// remaining quantity reaches zero is archived but kept for accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    /// Position of this lot in the (holder, asset) sequence.
    pub seq: u64,
    pub initial_quantity: u64,
    pub remaining_quantity: u64,
    /// Total purchase cost in wei.
    #[serde(with = "super::u128_string")]
    pub cost_wei: u128,
    pub purchase_block: u64,
    /// Block of the most recent (partial) sale consuming this lot.
    pub sale_block: Option<u64>,
    /// Cumulative proceeds attributed to this lot across all sales, in wei.
    #[serde(with = "super::u128_string")]
    pub sale_proceeds_wei: u128,
    /// Share supply observed at purchase time.
    pub supply_at_purchase: u64,
}

impl Lot {
    pub fn is_depleted(&self) -> bool {
        self.remaining_quantity == 0
    }

    /// Purchase cost per share, rounded down.
    pub fn unit_cost_wei(&self) -> u128 {
        if self.initial_quantity == 0 {
            0
        } else {
            self.cost_wei / self.initial_quantity as u128
        }
    }

    /// Quantity consumed so far.
    pub fn consumed_quantity(&self) -> u64 {
        self.initial_quantity - self.remaining_quantity
    }

    /// Cost attributable to the consumed portion, proportional by quantity.
    pub fn consumed_cost_wei(&self) -> u128 {
        if self.initial_quantity == 0 {
            return 0;
        }
        self.cost_wei * self.consumed_quantity() as u128 / self.initial_quantity as u128
    }
}

/// Fields of a lot that the chain indexer supplies; the ledger assigns `seq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLot {
    pub quantity: u64,
    pub cost_wei: u128,
    pub purchase_block: u64,
    pub supply_at_purchase: u64,
}
