//! Domain types for the bonding-curve trading bot.
//!
//! This module provides:
//! - Domain primitives: TimeMs, Address, Asset, Side
//! - TradeEvent as decoded from the contract's event log
//! - Lot, the unit of position accounting
//! - Order lifecycle records: ProposedOrder, PendingOrder, TriggerSource

pub mod event;
pub mod lot;
pub mod order;
pub mod primitives;

pub use event::TradeEvent;
pub use lot::{Lot, NewLot};
pub use order::{PendingOrder, PendingStatus, ProposedOrder, TriggerSource};
pub use primitives::{u128_string, Address, Asset, Side, TimeMs};
