//! Chain indexer: replays trade events into the position ledger.
//!
//! The indexer is the single writer of the ledger. It resumes from the last
//! block the persisted lots already reflect, catches up in batches, and then
//! follows the head. Rule evaluation hooks fire only once live; historical
//! events describe trades that are long over.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, ChainError};
use crate::domain::{NewLot, Side, TradeEvent};
use crate::fleet::KeyFleet;
use crate::ledger::{LedgerError, PositionLedger};
use crate::orders::{OrderStoreError, PendingOrderStore, RecencyStore};
use crate::rules::{EvalContext, RuleEngine, RuleInvoker};

/// Indexer failures are all fatal: the ledger's correctness depends on
/// every event applying in order, so the caller must stop rather than skip.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] OrderStoreError),
}

/// Rule evaluation wiring, attached only when the process runs rules.
pub struct RuleHooks {
    pub engine: Arc<RuleEngine>,
    pub invoker: RuleInvoker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    CatchingUp,
    Live,
}

/// What one `step` call did, so the run loop knows when to sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A batch was indexed up to the contained block.
    Advanced(u64),
    /// Already at the head; nothing to do.
    Idle,
}

pub struct ChainIndexer {
    chain: Arc<dyn ChainClient>,
    ledger: PositionLedger,
    pending: PendingOrderStore,
    recency: RecencyStore,
    fleet: Arc<KeyFleet>,
    hooks: Option<RuleHooks>,
    batch_size: u64,
    live_delta: u64,
    poll_delay: Duration,
    phase: Phase,
    next_block: u64,
}

impl ChainIndexer {
    /// Build an indexer resuming from the ledger's own high-water mark.
    ///
    /// The resume point is derived from persisted lot content, never from a
    /// separate cursor file, so the ledger and the cursor cannot disagree.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        ledger: PositionLedger,
        pending: PendingOrderStore,
        recency: RecencyStore,
        fleet: Arc<KeyFleet>,
        hooks: Option<RuleHooks>,
        deployment_block: u64,
        batch_size: u64,
        live_delta: u64,
        poll_delay: Duration,
    ) -> Result<Self, IndexerError> {
        let resume = match ledger.latest_indexed_block()? {
            Some(latest) => (latest + 1).max(deployment_block),
            None => deployment_block,
        };
        info!(resume_block = resume, "indexer starting");
        Ok(Self {
            chain,
            ledger,
            pending,
            recency,
            fleet,
            hooks,
            batch_size,
            live_delta,
            poll_delay,
            phase: Phase::CatchingUp,
            next_block: resume,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Index the next batch, if the head has anything new.
    pub async fn step(&mut self) -> Result<StepOutcome, IndexerError> {
        let head = self.chain.block_number().await?;
        if self.next_block > head {
            return Ok(StepOutcome::Idle);
        }

        let to = head.min(self.next_block + self.batch_size - 1);
        let events = self.chain.trade_events(self.next_block, to).await?;
        debug!(from = self.next_block, to, count = events.len(), "indexing batch");

        // The live transition is sticky: once within the delta of the head,
        // rule hooks stay armed even if a burst of blocks briefly widens
        // the gap again.
        if self.phase == Phase::CatchingUp && head - to <= self.live_delta {
            info!(block = to, head, "indexer is live");
            self.phase = Phase::Live;
        }

        for event in &events {
            self.apply_event(event)?;
        }
        self.next_block = to + 1;
        Ok(StepOutcome::Advanced(to))
    }

    /// Index forever, sleeping the poll delay whenever the head is reached.
    pub async fn run(&mut self) -> Result<(), IndexerError> {
        loop {
            match self.step().await? {
                StepOutcome::Advanced(_) => {}
                StepOutcome::Idle => tokio::time::sleep(self.poll_delay).await,
            }
        }
    }

    fn apply_event(&self, event: &TradeEvent) -> Result<(), IndexerError> {
        // Recency covers the whole market, not just fleet activity, but only
        // live events: a wall-clock stamp on a replayed historical trade
        // would make `no_recent_trade` see ancient activity as fresh.
        if self.phase == Phase::Live {
            self.recency
                .record(&event.asset, event.side, event.block_number)?;
        }

        if !self.fleet.is_member(&event.trader) {
            self.maybe_enqueue_rules(event);
            return Ok(());
        }

        if let Some(order) = self.pending.get(&event.trader)? {
            if order.tx_hash == event.tx_hash {
                self.pending.mark_mined(&event.trader, &event.tx_hash)?;
                info!(holder = %event.trader, tx_hash = %event.tx_hash,
                    "pending order confirmed on chain");
            }
        }

        if event.quantity == 0 {
            warn!(block = event.block_number, tx_hash = %event.tx_hash,
                "zero-quantity trade event, skipping");
            self.maybe_enqueue_rules(event);
            return Ok(());
        }

        match event.side {
            Side::Buy => {
                self.ledger.add_holder(&event.trader)?;
                self.ledger.add_lot(
                    &event.trader,
                    &event.asset,
                    NewLot {
                        quantity: event.quantity,
                        cost_wei: event.wei,
                        purchase_block: event.block_number,
                        supply_at_purchase: event.supply,
                    },
                )?;
            }
            Side::Sell => self.apply_sell(event)?,
        }

        self.maybe_enqueue_rules(event);
        Ok(())
    }

    /// Consume lots oldest-first, attributing proceeds pro rata by quantity.
    /// The last consumed lot absorbs the division remainder so the proceeds
    /// attributed always sum exactly to the event's wei.
    fn apply_sell(&self, event: &TradeEvent) -> Result<(), IndexerError> {
        let lots = self.ledger.lots_ascending(&event.trader, &event.asset)?;
        let held: u64 = lots.iter().map(|l| l.remaining_quantity).sum();
        if held < event.quantity {
            return Err(LedgerError::InsufficientBits {
                holder: event.trader.clone(),
                asset: event.asset.clone(),
                held,
                requested: event.quantity,
            }
            .into());
        }

        let mut left = event.quantity;
        let mut allocated: u128 = 0;
        for lot in lots {
            if left == 0 {
                break;
            }
            let take = left.min(lot.remaining_quantity);
            let proceeds = if take == left {
                event.wei - allocated
            } else {
                // Wei values can occupy the full 16-byte range the log
                // parser admits, so the pro-rata product may overflow;
                // divide first in that case and let the final lot absorb
                // the extra rounding loss.
                match event.wei.checked_mul(take as u128) {
                    Some(product) => product / event.quantity as u128,
                    None => event.wei / event.quantity as u128 * take as u128,
                }
            };
            allocated += proceeds;
            self.ledger.consume_lot(
                &event.trader,
                &event.asset,
                lot.seq,
                take,
                event.block_number,
                proceeds,
            )?;
            left -= take;
        }
        Ok(())
    }

    fn maybe_enqueue_rules(&self, event: &TradeEvent) {
        if self.phase != Phase::Live {
            return;
        }
        let Some(hooks) = &self.hooks else {
            return;
        };
        let holder = self
            .fleet
            .is_member(&event.trader)
            .then(|| event.trader.clone());
        let ctx = EvalContext::for_event(event, holder);
        hooks.invoker.enqueue_buy(hooks.engine.clone(), ctx.clone());
        hooks.invoker.enqueue_sell(hooks.engine.clone(), ctx);
    }
}
