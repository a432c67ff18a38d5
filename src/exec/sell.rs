//! Sell gofer: drains alerted sell proposals into on-chain sells.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::chain::ChainClient;
use crate::domain::{Asset, ProposedOrder, Side};
use crate::fleet::{KeyFleet, SlotCoordinator};
use crate::notify::Notifier;
use crate::orders::{HaltFlag, ProposalStore};

use super::scheduler::{PeriodicTask, Throttle};
use super::{simulated_submission, GoferError};

pub struct SellGofer {
    proposals: ProposalStore,
    slots: Arc<SlotCoordinator>,
    chain: Arc<dyn ChainClient>,
    fleet: Arc<KeyFleet>,
    halt: HaltFlag,
    notifier: Notifier,
    stale_after: Duration,
    gas_limit: u64,
    simulate: bool,
    halt_log: Throttle,
}

impl SellGofer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        proposals: ProposalStore,
        slots: Arc<SlotCoordinator>,
        chain: Arc<dyn ChainClient>,
        fleet: Arc<KeyFleet>,
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
            fleet,
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
                info!("execution halted by operator, sell gofer idle");
            }
            return;
        }
        if let Err(e) = self.cycle().await {
            error!("sell gofer cycle failed: {}", e);
        }
    }

    async fn cycle(&mut self) -> Result<(), GoferError> {
        let assets = self.proposals.take_alerts(Side::Sell)?;
        for (i, asset) in assets.iter().enumerate() {
            let halted = self.process_asset(asset).await?;
            if halted {
                // Hand untouched alerts back so nothing is lost to the halt.
                for remaining in &assets[i + 1..] {
                    self.proposals.raise_alert(Side::Sell, remaining)?;
                }
                info!("halt engaged mid-cycle, sell gofer stopping");
                return Ok(());
            }
        }
        Ok(())
    }

    /// Returns `true` when the halt flag interrupted the asset.
    async fn process_asset(&self, asset: &Asset) -> Result<bool, GoferError> {
        for (path, order) in self.proposals.proposals_for(Side::Sell, asset)? {
            if self.halt.is_halted() {
                self.proposals.raise_alert(Side::Sell, asset)?;
                return Ok(true);
            }
            if let Err(e) = self.process_proposal(&path, &order).await {
                warn!(asset = %asset, rule = %order.rule_id,
                    "sell proposal failed, retrying next cycle: {}", e);
                self.proposals.raise_alert(Side::Sell, asset)?;
            }
        }
        Ok(false)
    }

    async fn process_proposal(
        &self,
        path: &std::path::Path,
        order: &ProposedOrder,
    ) -> Result<(), GoferError> {
        if ProposalStore::is_stale(order, self.stale_after) {
            warn!(asset = %order.asset, rule = %order.rule_id,
                "discarding stale sell proposal");
            self.proposals.remove(path)?;
            return Ok(());
        }
        let Some(holder) = order.holder.as_ref() else {
            warn!(asset = %order.asset, rule = %order.rule_id,
                "sell proposal names no holder, discarding");
            self.proposals.remove(path)?;
            return Ok(());
        };

        if self.slots.refresh_pending_order(holder).await?.is_some() {
            debug!(holder = %holder, asset = %order.asset,
                "holder busy with in-flight order, keeping proposal");
            self.proposals.raise_alert(Side::Sell, &order.asset)?;
            return Ok(());
        }

        let held = self.chain.shares_balance(&order.asset, holder).await?;
        if held == 0 {
            info!(holder = %holder, asset = %order.asset,
                "no shares held on chain, discarding sell proposal");
            self.proposals.remove(path)?;
            return Ok(());
        }
        let mut quantity = order.quantity;
        if held < quantity {
            warn!(holder = %holder, asset = %order.asset, proposed = quantity, held,
                "sell quantity exceeds held shares, clamping");
            self.notifier.warn(format!(
                "sell of {} clamped from {} to {} held shares for {}",
                order.asset, quantity, held, holder
            ));
            quantity = held;
        }

        if !self.fleet.meets_minimum_gas(holder, self.gas_limit).await? {
            warn!(holder = %holder, asset = %order.asset,
                "holder cannot cover gas, discarding sell proposal");
            self.notifier
                .warn(format!("holder {} low on gas, sell of {} dropped", holder, order.asset));
            self.slots.cache_low_balance(holder).await;
            self.proposals.remove(path)?;
            return Ok(());
        }

        let submission = if self.simulate {
            info!(holder = %holder, asset = %order.asset, quantity,
                "simulation mode, fabricating sell acceptance");
            simulated_submission(self.chain.as_ref(), holder, &order.asset, Side::Sell, quantity)
                .await?
        } else {
            self.chain.submit_sell(holder, &order.asset, quantity).await?
        };

        self.slots
            .record_pending_order(holder, &order.asset, Side::Sell, quantity, &submission)?;
        self.proposals.remove(path)?;
        info!(holder = %holder, asset = %order.asset, quantity, rule = %order.rule_id,
            tx_hash = %submission.tx_hash, "sell dispatched");
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for SellGofer {
    fn name(&self) -> &'static str {
        "sell-gofer"
    }

    async fn run_cycle(&mut self) {
        self.run_once().await;
    }
}
