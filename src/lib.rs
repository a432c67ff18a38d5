pub mod chain;
pub mod config;
pub mod domain;
pub mod exec;
pub mod feeds;
pub mod fleet;
pub mod indexer;
pub mod ledger;
pub mod notify;
pub mod orders;
pub mod report;
pub mod rules;

pub use chain::{ChainClient, ChainError, JsonRpcChainClient, MockChainClient};
pub use config::Config;
pub use domain::{
    Address, Asset, Lot, NewLot, PendingOrder, PendingStatus, ProposedOrder, Side, TimeMs,
    TradeEvent, TriggerSource,
};
pub use fleet::{KeyFleet, SlotCoordinator};
pub use indexer::ChainIndexer;
pub use ledger::PositionLedger;
pub use report::PnlReport;
pub use rules::{RuleEngine, RuleInvoker};
