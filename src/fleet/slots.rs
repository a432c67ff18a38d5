//! Transaction slot coordinator: matches orders to free, funded keys.
//!
//! A holder's slot is free iff no pending-order record exists for it. The
//! coordinator owns the round-robin cursor and the low-balance cache as
//! instance state; one coordinator is constructed per process and shared by
//! reference.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, ChainError, TxSubmission};
use crate::domain::{Address, Asset, PendingOrder, PendingStatus, Side, TimeMs};
use crate::orders::{OrderStoreError, PendingOrderStore};

use super::KeyFleet;

#[derive(Debug, Error)]
pub enum SlotError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] OrderStoreError),
}

#[derive(Debug, Default)]
struct CursorState {
    /// Index of the last chosen holder; scanning starts just after it.
    cursor: usize,
    /// Holders recently seen underfunded, with the time of that observation.
    low_balance: HashMap<Address, Instant>,
}

pub struct SlotCoordinator {
    fleet: Arc<KeyFleet>,
    chain: Arc<dyn ChainClient>,
    pending: PendingOrderStore,
    max_pending_age: Duration,
    low_balance_ttl: Duration,
    state: tokio::sync::Mutex<CursorState>,
}

impl SlotCoordinator {
    pub fn new(
        fleet: Arc<KeyFleet>,
        chain: Arc<dyn ChainClient>,
        pending: PendingOrderStore,
        max_pending_age: Duration,
        low_balance_ttl: Duration,
    ) -> Self {
        Self {
            fleet,
            chain,
            pending,
            max_pending_age,
            low_balance_ttl,
            state: tokio::sync::Mutex::new(CursorState::default()),
        }
    }

    /// Pick a free, sufficiently funded holder for a new transaction.
    ///
    /// Scans round-robin starting just after the last chosen index so later
    /// keys are not starved. If the first pass finds nothing, a second pass
    /// actively reconciles each holder's pending order (mined mark, expiry,
    /// nonce advance) before re-checking, recovering slots whose marker had
    /// not yet been cleaned up. Returns `None` when both passes come up dry.
    pub async fn select_free_slot(&self, gas_limit: u64) -> Result<Option<Address>, SlotError> {
        let mut state = self.state.lock().await;
        if let Some(found) = self.scan_pass(&mut state, gas_limit, false).await? {
            return Ok(Some(found));
        }
        debug!("no free-looking slot; reconciling pending orders");
        self.scan_pass(&mut state, gas_limit, true).await
    }

    async fn scan_pass(
        &self,
        state: &mut CursorState,
        gas_limit: u64,
        reconcile: bool,
    ) -> Result<Option<Address>, SlotError> {
        let n = self.fleet.len();
        for offset in 1..=n {
            let idx = (state.cursor + offset) % n;
            let holder = &self.fleet.addresses()[idx];

            if reconcile {
                self.refresh_pending_order(holder).await?;
            }
            if self.pending.get(holder)?.is_some() {
                continue;
            }
            if let Some(seen) = state.low_balance.get(holder) {
                if seen.elapsed() < self.low_balance_ttl {
                    continue;
                }
                state.low_balance.remove(holder);
            }
            if !self.fleet.meets_minimum_gas(holder, gas_limit).await?
                || !self.fleet.meets_minimum_token(holder).await?
            {
                // Balances rarely change within seconds; cache the miss to
                // stay under the node's rate limits.
                state.low_balance.insert(holder.clone(), Instant::now());
                continue;
            }

            state.cursor = idx;
            return Ok(Some(holder.clone()));
        }
        Ok(None)
    }

    /// Note a holder as underfunded, suppressing re-checks for the cache TTL.
    pub async fn cache_low_balance(&self, holder: &Address) {
        self.state
            .lock()
            .await
            .low_balance
            .insert(holder.clone(), Instant::now());
    }

    /// Write the pending-order record for a dispatched transaction.
    ///
    /// Called the moment the node accepts the transaction, before any mining
    /// confirmation, so the slot is busy for the whole in-flight window.
    pub fn record_pending_order(
        &self,
        holder: &Address,
        asset: &Asset,
        side: Side,
        quantity: u64,
        submission: &TxSubmission,
    ) -> Result<PendingOrder, SlotError> {
        let order = PendingOrder {
            holder: holder.clone(),
            asset: asset.clone(),
            side,
            quantity,
            tx_hash: submission.tx_hash.clone(),
            nonce: submission.nonce,
            submitted_ms: TimeMs::now(),
            status: PendingStatus::Pending,
        };
        self.pending.record(&order)?;
        info!(
            holder = %holder, asset = %asset, %side, quantity,
            tx_hash = %submission.tx_hash, "recorded pending order"
        );
        Ok(order)
    }

    /// Flag the holder's pending order as mined if the hash matches.
    ///
    /// Deletion is deferred to the next refresh.
    pub fn mark_mined(&self, holder: &Address, tx_hash: &str) -> Result<bool, SlotError> {
        Ok(self.pending.mark_mined(holder, tx_hash)?)
    }

    /// Reconcile one holder's pending order against its confirmation signals.
    ///
    /// Removes the record and returns `None` if it was marked mined, if its
    /// age exceeds the max-pending threshold (likely dropped; reclaiming
    /// risks the tx landing later, an accepted trade-off), or if the holder's
    /// on-chain nonce has advanced past the recorded one. Otherwise the live
    /// order is returned unchanged.
    pub async fn refresh_pending_order(
        &self,
        holder: &Address,
    ) -> Result<Option<PendingOrder>, SlotError> {
        let Some(order) = self.pending.get(holder)? else {
            return Ok(None);
        };

        match order.status {
            PendingStatus::Mined | PendingStatus::Expired => {
                debug!(holder = %holder, tx_hash = %order.tx_hash, status = ?order.status,
                    "clearing settled pending order");
                self.pending.remove(holder)?;
                return Ok(None);
            }
            PendingStatus::Pending => {}
        }

        if order.submitted_ms.age_ms() as u128 > self.max_pending_age.as_millis() {
            warn!(holder = %holder, tx_hash = %order.tx_hash,
                "pending order exceeded max age, reclaiming slot");
            self.pending.remove(holder)?;
            return Ok(None);
        }

        let nonce = self.chain.transaction_count(holder).await?;
        if nonce > order.nonce {
            debug!(holder = %holder, recorded = order.nonce, observed = nonce,
                "nonce advanced past pending order, clearing");
            self.pending.remove(holder)?;
            return Ok(None);
        }

        Ok(Some(order))
    }

    /// Refresh, then remove the record if its hash matches. Administrative
    /// convenience; returns whether a matching record was cleared.
    pub async fn update_pending_order(
        &self,
        tx_hash: &str,
        holder: &Address,
    ) -> Result<bool, SlotError> {
        match self.refresh_pending_order(holder).await? {
            Some(order) if order.tx_hash == tx_hash => {
                self.pending.remove(holder)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use tempfile::TempDir;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    async fn setup(
        ttl: Duration,
        max_age: Duration,
    ) -> (SlotCoordinator, Arc<MockChainClient>, TempDir) {
        let chain = Arc::new(MockChainClient::new().with_gas_price(1));
        let addresses = vec![addr("0xa"), addr("0xb"), addr("0xc")];
        for a in &addresses {
            chain.set_gas_balance(a, 1_000_000);
            chain.set_token_balance(a, 1_000_000);
        }
        let fleet = Arc::new(KeyFleet::new(addresses, chain.clone(), 100, 100));
        let dir = TempDir::new().unwrap();
        let pending = PendingOrderStore::open(dir.path()).unwrap();
        let coordinator =
            SlotCoordinator::new(fleet, chain.clone(), pending, max_age, ttl);
        (coordinator, chain, dir)
    }

    fn submission(hash: &str, nonce: u64) -> TxSubmission {
        TxSubmission {
            tx_hash: hash.to_string(),
            nonce,
        }
    }

    #[tokio::test]
    async fn test_round_robin_cycles_all_holders() {
        let (coordinator, _chain, _dir) =
            setup(Duration::from_secs(30), Duration::from_secs(600)).await;

        // Cursor starts at index 0, so the first selection is the next holder.
        assert_eq!(coordinator.select_free_slot(100).await.unwrap(), Some(addr("0xb")));
        assert_eq!(coordinator.select_free_slot(100).await.unwrap(), Some(addr("0xc")));
        assert_eq!(coordinator.select_free_slot(100).await.unwrap(), Some(addr("0xa")));
        assert_eq!(coordinator.select_free_slot(100).await.unwrap(), Some(addr("0xb")));
    }

    #[tokio::test]
    async fn test_busy_holder_is_skipped_until_cleared() {
        let (coordinator, _chain, _dir) =
            setup(Duration::from_secs(30), Duration::from_secs(600)).await;

        let asset = Asset::new("0xfff");
        let slot = coordinator.select_free_slot(100).await.unwrap().unwrap();
        assert_eq!(slot, addr("0xb"));
        coordinator
            .record_pending_order(&slot, &asset, Side::Buy, 1, &submission("0x1", 0))
            .unwrap();

        assert_eq!(coordinator.select_free_slot(100).await.unwrap(), Some(addr("0xc")));

        coordinator.mark_mined(&addr("0xb"), "0x1").unwrap();
        assert!(coordinator
            .refresh_pending_order(&addr("0xb"))
            .await
            .unwrap()
            .is_none());
        // Slot is free again.
        assert_eq!(coordinator.select_free_slot(100).await.unwrap(), Some(addr("0xa")));
        assert_eq!(coordinator.select_free_slot(100).await.unwrap(), Some(addr("0xb")));
    }

    #[tokio::test]
    async fn test_nonce_advance_clears_pending() {
        let (coordinator, chain, _dir) =
            setup(Duration::from_secs(30), Duration::from_secs(600)).await;
        let holder = addr("0xa");
        let asset = Asset::new("0xfff");

        coordinator
            .record_pending_order(&holder, &asset, Side::Sell, 1, &submission("0x1", 4))
            .unwrap();
        chain.set_transaction_count(&holder, 4);
        assert!(coordinator
            .refresh_pending_order(&holder)
            .await
            .unwrap()
            .is_some());

        chain.set_transaction_count(&holder, 5);
        assert!(coordinator
            .refresh_pending_order(&holder)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_expired_pending_is_reclaimed() {
        let (coordinator, _chain, _dir) =
            setup(Duration::from_secs(30), Duration::from_millis(0)).await;
        let holder = addr("0xa");
        let asset = Asset::new("0xfff");

        coordinator
            .record_pending_order(&holder, &asset, Side::Buy, 1, &submission("0x1", 0))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(coordinator
            .refresh_pending_order(&holder)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_low_balance_holder_skipped_then_retried_after_ttl() {
        let (coordinator, chain, _dir) =
            setup(Duration::from_millis(20), Duration::from_secs(600)).await;

        chain.set_token_balance(&addr("0xb"), 0);
        assert_eq!(coordinator.select_free_slot(100).await.unwrap(), Some(addr("0xc")));

        chain.set_token_balance(&addr("0xb"), 1_000_000);
        // Still cached as low balance within the TTL: cursor at c, scan a, b.
        assert_eq!(coordinator.select_free_slot(100).await.unwrap(), Some(addr("0xa")));
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(coordinator.select_free_slot(100).await.unwrap(), Some(addr("0xb")));
    }

    #[tokio::test]
    async fn test_second_pass_reconciles_stale_markers() {
        let (coordinator, chain, _dir) =
            setup(Duration::from_secs(30), Duration::from_secs(600)).await;
        let asset = Asset::new("0xfff");

        for (holder, hash) in [(addr("0xa"), "0x1"), (addr("0xb"), "0x2"), (addr("0xc"), "0x3")] {
            coordinator
                .record_pending_order(&holder, &asset, Side::Buy, 1, &submission(hash, 0))
                .unwrap();
        }
        assert_eq!(coordinator.select_free_slot(100).await.unwrap(), None);

        // One tx lands; only the reconciling second pass can see it.
        chain.set_transaction_count(&addr("0xb"), 1);
        assert_eq!(coordinator.select_free_slot(100).await.unwrap(), Some(addr("0xb")));
    }

    #[tokio::test]
    async fn test_update_pending_order_matches_hash() {
        let (coordinator, _chain, _dir) =
            setup(Duration::from_secs(30), Duration::from_secs(600)).await;
        let holder = addr("0xa");
        let asset = Asset::new("0xfff");

        coordinator
            .record_pending_order(&holder, &asset, Side::Buy, 1, &submission("0x1", 0))
            .unwrap();
        assert!(!coordinator.update_pending_order("0x9", &holder).await.unwrap());
        assert!(coordinator.update_pending_order("0x1", &holder).await.unwrap());
        assert!(!coordinator.update_pending_order("0x1", &holder).await.unwrap());
    }
}
