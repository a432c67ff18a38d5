//! Order execution: the gofers that turn proposals into transactions.
//!
//! Each gofer runs as its own periodic task, scans the alerted assets of one
//! direction, and dispatches at most one transaction per free fleet slot.
//! Failures are isolated per proposal; a bad proposal never takes down a
//! cycle.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::chain::{ChainClient, ChainError, TxSubmission};
use crate::domain::{Address, Asset, Side, TimeMs};
use crate::fleet::SlotError;
use crate::ledger::LedgerError;
use crate::orders::OrderStoreError;

pub mod buy;
pub mod scheduler;
pub mod sell;
pub mod sweep;

pub use buy::BuyGofer;
pub use scheduler::{run_periodic, PeriodicTask, Throttle};
pub use sell::SellGofer;
pub use sweep::FullSweep;

#[derive(Debug, Error)]
pub enum GoferError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] OrderStoreError),
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Fabricate a node acceptance without touching the chain, for dry runs.
///
/// The hash is synthetic but unique enough to exercise the pending-order
/// path; the nonce is the holder's real transaction count so nonce-advance
/// reconciliation still behaves.
pub(crate) async fn simulated_submission(
    chain: &dyn ChainClient,
    holder: &Address,
    asset: &Asset,
    side: Side,
    quantity: u64,
) -> Result<TxSubmission, ChainError> {
    let nonce = chain.transaction_count(holder).await?;
    let mut hasher = Sha256::new();
    hasher.update(holder.as_str().as_bytes());
    hasher.update(asset.as_str().as_bytes());
    hasher.update(side.as_str().as_bytes());
    hasher.update(quantity.to_be_bytes());
    hasher.update(nonce.to_be_bytes());
    hasher.update(TimeMs::now().as_ms().to_be_bytes());
    let tx_hash = format!("0x{}", hex::encode(hasher.finalize()));
    Ok(TxSubmission { tx_hash, nonce })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;

    #[tokio::test]
    async fn test_simulated_submission_carries_real_nonce() {
        let chain = MockChainClient::new();
        let holder = Address::new("0xaaa");
        chain.set_transaction_count(&holder, 7);

        let sub = simulated_submission(&chain, &holder, &Asset::new("0xfff"), Side::Buy, 3)
            .await
            .unwrap();
        assert_eq!(sub.nonce, 7);
        assert!(sub.tx_hash.starts_with("0x"));
        assert_eq!(sub.tx_hash.len(), 66);
    }
}
