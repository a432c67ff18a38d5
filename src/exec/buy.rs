//! Buy gofer: drains alerted buy proposals into on-chain buys.
//!
//! Buys are all-or-nothing: a proposal the chosen holder cannot fully fund
//! is discarded rather than scaled down, since a partial entry would skew
//! the rule-driven position sizing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::chain::ChainClient;
use crate::domain::{Asset, ProposedOrder, Side};
use crate::fleet::SlotCoordinator;
use crate::notify::Notifier;
use crate::orders::{HaltFlag, ProposalStore};

use super::scheduler::{PeriodicTask, Throttle};
use super::{simulated_submission, GoferError};

pub struct BuyGofer {
    proposals: ProposalStore,
    slots: Arc<SlotCoordinator>,
    chain: Arc<dyn ChainClient>,
    halt: HaltFlag,
    notifier: Notifier,
    stale_after: Duration,
    gas_limit: u64,
    simulate: bool,
    halt_log: Throttle,
}

/// Outcome of one proposal attempt, for the cycle's control flow.
enum Attempt {
    Done,
    /// No free slot in the fleet; the proposal stays for the next cycle.
    NoSlot,
}

impl BuyGofer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        proposals: ProposalStore,
        slots: Arc<SlotCoordinator>,
        chain: Arc<dyn ChainClient>,
        halt: HaltFlag,
        notifier: Notifier,
        stale_after: Duration,
        gas_limit: u64,
        simulate: bool,
        halt_log_every: Duration,
    ) -> Self {
        Self {
            proposals,
            slots,
            chain,
            halt,
            notifier,
            stale_after,
            gas_limit,
            simulate,
            halt_log: Throttle::new(halt_log_every),
        }
    }

    pub async fn run_once(&mut self) {
        if self.halt.is_halted() {
            if self.halt_log.ready() {
                info!("execution halted by operator, buy gofer idle");
            }
            return;
        }
        if let Err(e) = self.cycle().await {
            error!("buy gofer cycle failed: {}", e);
        }
    }

    async fn cycle(&mut self) -> Result<(), GoferError> {
        let assets = self.proposals.take_alerts(Side::Buy)?;
        for (i, asset) in assets.iter().enumerate() {
            if !self.process_asset(asset).await? {
                // Cycle cut short; hand the untouched alerts back.
                for remaining in &assets[i + 1..] {
                    self.proposals.raise_alert(Side::Buy, remaining)?;
                }
                return Ok(());
            }
        }
        Ok(())
    }

    /// Returns `false` when the cycle should stop after this asset.
    ///
    /// A proposal that finds no free slot is skipped, not the whole scan:
    /// later proposals still get their stale check, so pruning is never
    /// deferred behind a saturated fleet.
    async fn process_asset(&self, asset: &Asset) -> Result<bool, GoferError> {
        let mut deferred = false;
        for (path, order) in self.proposals.proposals_for(Side::Buy, asset)? {
            if self.halt.is_halted() {
                self.proposals.raise_alert(Side::Buy, asset)?;
                info!("halt engaged mid-cycle, buy gofer stopping");
                return Ok(false);
            }
            match self.process_proposal(&path, &order).await {
                Ok(Attempt::Done) => {}
                Ok(Attempt::NoSlot) => {
                    info!(asset = %asset, rule = %order.rule_id,
                        "no free fleet slot, deferring buy proposal");
                    deferred = true;
                }
                Err(e) => {
                    warn!(asset = %asset, rule = %order.rule_id,
                        "buy proposal failed, retrying next cycle: {}", e);
                    deferred = true;
                }
            }
        }
        if deferred {
            self.proposals.raise_alert(Side::Buy, asset)?;
        }
        Ok(true)
    }

    async fn process_proposal(
        &self,
        path: &std::path::Path,
        order: &ProposedOrder,
    ) -> Result<Attempt, GoferError> {
        if ProposalStore::is_stale(order, self.stale_after) {
            warn!(asset = %order.asset, rule = %order.rule_id,
                "discarding stale buy proposal");
            self.proposals.remove(path)?;
            return Ok(Attempt::Done);
        }

        let Some(holder) = self.slots.select_free_slot(self.gas_limit).await? else {
            return Ok(Attempt::NoSlot);
        };

        let cost = self.chain.buy_price(&order.asset, order.quantity).await?;
        let balance = self.chain.token_balance(&holder).await?;
        if balance < cost {
            warn!(holder = %holder, asset = %order.asset, quantity = order.quantity,
                cost, balance, "holder cannot fund full buy, discarding proposal");
            self.notifier.warn(format!(
                "buy of {} x{} dropped, holder {} short {} wei",
                order.asset,
                order.quantity,
                holder,
                cost - balance
            ));
            self.slots.cache_low_balance(&holder).await;
            self.proposals.remove(path)?;
            return Ok(Attempt::Done);
        }

        let submission = if self.simulate {
            info!(holder = %holder, asset = %order.asset, quantity = order.quantity,
                "simulation mode, fabricating buy acceptance");
            simulated_submission(
                self.chain.as_ref(),
                &holder,
                &order.asset,
                Side::Buy,
                order.quantity,
            )
            .await?
        } else {
            self.chain
                .submit_buy(&holder, &order.asset, order.quantity, cost)
                .await?
        };

        self.slots
            .record_pending_order(&holder, &order.asset, Side::Buy, order.quantity, &submission)?;
        self.proposals.remove(path)?;
        info!(holder = %holder, asset = %order.asset, quantity = order.quantity,
            rule = %order.rule_id, tx_hash = %submission.tx_hash, cost, "buy dispatched");
        Ok(Attempt::Done)
    }
}

#[async_trait]
impl PeriodicTask for BuyGofer {
    fn name(&self) -> &'static str {
        "buy-gofer"
    }

    async fn run_cycle(&mut self) {
        self.run_once().await;
    }
}
