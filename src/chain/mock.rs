//! Mock chain client for testing without a node.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::{Address, Asset, Side, TradeEvent};

use super::{ChainClient, ChainError, TxSubmission};

/// One submission recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSubmission {
    pub holder: Address,
    pub asset: Asset,
    pub side: Side,
    pub quantity: u64,
}

#[derive(Debug, Default)]
struct MockState {
    head: u64,
    events: Vec<TradeEvent>,
    gas_balances: HashMap<Address, u128>,
    token_balances: HashMap<Address, u128>,
    shares: HashMap<(Asset, Address), u64>,
    tx_counts: HashMap<Address, u64>,
    gas_price: u128,
    buy_unit_price: HashMap<Asset, u128>,
    sell_unit_price: HashMap<Asset, u128>,
    submissions: Vec<RecordedSubmission>,
    next_hash: u64,
}

/// Mock chain client with builder-style setup and interior mutability, so
/// tests can shift balances and nonces mid-scenario.
#[derive(Debug, Default)]
pub struct MockChainClient {
    state: Mutex<MockState>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_head(self, head: u64) -> Self {
        self.state.lock().unwrap().head = head;
        self
    }

    pub fn with_event(self, event: TradeEvent) -> Self {
        self.state.lock().unwrap().events.push(event);
        self
    }

    pub fn with_events(self, events: Vec<TradeEvent>) -> Self {
        self.state.lock().unwrap().events.extend(events);
        self
    }

    pub fn with_gas_price(self, wei: u128) -> Self {
        self.state.lock().unwrap().gas_price = wei;
        self
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn set_gas_balance(&self, address: &Address, wei: u128) {
        self.state
            .lock()
            .unwrap()
            .gas_balances
            .insert(address.clone(), wei);
    }

    pub fn set_token_balance(&self, address: &Address, wei: u128) {
        self.state
            .lock()
            .unwrap()
            .token_balances
            .insert(address.clone(), wei);
    }

    pub fn set_shares_balance(&self, asset: &Asset, address: &Address, quantity: u64) {
        self.state
            .lock()
            .unwrap()
            .shares
            .insert((asset.clone(), address.clone()), quantity);
    }

    pub fn set_transaction_count(&self, address: &Address, count: u64) {
        self.state
            .lock()
            .unwrap()
            .tx_counts
            .insert(address.clone(), count);
    }

    pub fn set_buy_unit_price(&self, asset: &Asset, wei: u128) {
        self.state
            .lock()
            .unwrap()
            .buy_unit_price
            .insert(asset.clone(), wei);
    }

    pub fn set_sell_unit_price(&self, asset: &Asset, wei: u128) {
        self.state
            .lock()
            .unwrap()
            .sell_unit_price
            .insert(asset.clone(), wei);
    }

    pub fn push_event(&self, event: TradeEvent) {
        self.state.lock().unwrap().events.push(event);
    }

    /// All submissions recorded so far, in order.
    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.state.lock().unwrap().submissions.clone()
    }

    fn submit(
        &self,
        holder: &Address,
        asset: &Asset,
        side: Side,
        quantity: u64,
    ) -> Result<TxSubmission, ChainError> {
        let mut state = self.state.lock().unwrap();
        let nonce = state.tx_counts.get(holder).copied().unwrap_or(0);
        state.next_hash += 1;
        let tx_hash = format!("0xmock{:08x}", state.next_hash);
        state.submissions.push(RecordedSubmission {
            holder: holder.clone(),
            asset: asset.clone(),
            side,
            quantity,
        });
        Ok(TxSubmission { tx_hash, nonce })
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn trade_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TradeEvent>, ChainError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn gas_balance(&self, address: &Address) -> Result<u128, ChainError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .gas_balances
            .get(address)
            .copied()
            .unwrap_or(0))
    }

    async fn token_balance(&self, address: &Address) -> Result<u128, ChainError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .token_balances
            .get(address)
            .copied()
            .unwrap_or(0))
    }

    async fn shares_balance(&self, asset: &Asset, address: &Address) -> Result<u64, ChainError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .shares
            .get(&(asset.clone(), address.clone()))
            .copied()
            .unwrap_or(0))
    }

    async fn transaction_count(&self, address: &Address) -> Result<u64, ChainError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tx_counts
            .get(address)
            .copied()
            .unwrap_or(0))
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        Ok(self.state.lock().unwrap().gas_price)
    }

    async fn buy_price(&self, asset: &Asset, quantity: u64) -> Result<u128, ChainError> {
        let unit = self
            .state
            .lock()
            .unwrap()
            .buy_unit_price
            .get(asset)
            .copied()
            .unwrap_or(0);
        Ok(unit * quantity as u128)
    }

    async fn sell_price(&self, asset: &Asset, quantity: u64) -> Result<u128, ChainError> {
        let unit = self
            .state
            .lock()
            .unwrap()
            .sell_unit_price
            .get(asset)
            .copied()
            .unwrap_or(0);
        Ok(unit * quantity as u128)
    }

    async fn submit_buy(
        &self,
        holder: &Address,
        asset: &Asset,
        quantity: u64,
        _max_cost_wei: u128,
    ) -> Result<TxSubmission, ChainError> {
        self.submit(holder, asset, Side::Buy, quantity)
    }

    async fn submit_sell(
        &self,
        holder: &Address,
        asset: &Asset,
        quantity: u64,
    ) -> Result<TxSubmission, ChainError> {
        self.submit(holder, asset, Side::Sell, quantity)
    }
}
