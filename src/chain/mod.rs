//! Chain client abstraction: the narrow interface to the blockchain node.
//!
//! ABI encoding and signing live behind this seam; the rest of the bot only
//! ever sees balances, prices, events, and opaque transaction hashes.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::domain::{Address, Asset, TradeEvent};

pub mod mock;
pub mod rpc;

pub use mock::MockChainClient;
pub use rpc::JsonRpcChainClient;

/// Node acceptance of a submitted transaction, before mining.
///
/// Returned as soon as the node has accepted the transaction into its pool;
/// callers record the pending order from this, never from the mining receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSubmission {
    pub tx_hash: String,
    /// The holder's transaction count at submit time.
    pub nonce: u64,
}

/// Error type for chain client operations.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("network error: {0}")]
    Network(String),
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("rate limited")]
    RateLimited,
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// Blockchain node collaborator.
///
/// Implementations must handle retry/backoff and rate limiting internally;
/// every method is an async suspension point.
#[async_trait]
pub trait ChainClient: Send + Sync + fmt::Debug {
    /// Current chain head block number.
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Trade events emitted by the market contract in `[from_block, to_block]`,
    /// ordered by (block number, log index).
    async fn trade_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TradeEvent>, ChainError>;

    /// Native (gas) balance of an address, in wei.
    async fn gas_balance(&self, address: &Address) -> Result<u128, ChainError>;

    /// Spendable token balance of an address, in wei.
    async fn token_balance(&self, address: &Address) -> Result<u128, ChainError>;

    /// Shares of `asset` currently held on-chain by `address`.
    async fn shares_balance(&self, asset: &Asset, address: &Address) -> Result<u64, ChainError>;

    /// The address's confirmed transaction count (next nonce).
    async fn transaction_count(&self, address: &Address) -> Result<u64, ChainError>;

    /// Current network gas price, in wei.
    async fn gas_price(&self) -> Result<u128, ChainError>;

    /// Total cost to buy `quantity` shares of `asset` at the current curve.
    async fn buy_price(&self, asset: &Asset, quantity: u64) -> Result<u128, ChainError>;

    /// Total proceeds from selling `quantity` shares of `asset`.
    async fn sell_price(&self, asset: &Asset, quantity: u64) -> Result<u128, ChainError>;

    /// Submit a buy and return once the node has accepted it.
    async fn submit_buy(
        &self,
        holder: &Address,
        asset: &Asset,
        quantity: u64,
        max_cost_wei: u128,
    ) -> Result<TxSubmission, ChainError>;

    /// Submit a sell and return once the node has accepted it.
    async fn submit_sell(
        &self,
        holder: &Address,
        asset: &Asset,
        quantity: u64,
    ) -> Result<TxSubmission, ChainError>;
}
