//! Full sweep: periodic rule evaluation over every open position.
//!
//! The event-driven path only reacts to assets that trade; a position in a
//! quiet asset would otherwise never meet its exit rules. The sweep walks
//! the ledger and enqueues an evaluation per open (holder, asset) pair.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::ledger::PositionLedger;
use crate::rules::{EvalContext, RuleEngine, RuleInvoker};

use super::scheduler::PeriodicTask;

pub struct FullSweep {
    ledger: PositionLedger,
    engine: Arc<RuleEngine>,
    invoker: RuleInvoker,
    include_buys: bool,
}

impl FullSweep {
    pub fn new(
        ledger: PositionLedger,
        engine: Arc<RuleEngine>,
        invoker: RuleInvoker,
        include_buys: bool,
    ) -> Self {
        Self {
            ledger,
            engine,
            invoker,
            include_buys,
        }
    }

    pub async fn run_once(&self) {
        let entries = match self.ledger.snapshot(None) {
            Ok(entries) => entries,
            Err(e) => {
                error!("sweep could not read ledger, skipping cycle: {}", e);
                return;
            }
        };

        let mut swept = 0usize;
        for entry in entries {
            let open: u64 = entry.active.iter().map(|l| l.remaining_quantity).sum();
            if open == 0 {
                continue;
            }
            let ctx = EvalContext::for_sweep(entry.holder.clone(), entry.asset.clone());
            self.invoker.enqueue_sell(self.engine.clone(), ctx.clone());
            if self.include_buys {
                self.invoker.enqueue_buy(self.engine.clone(), ctx);
            }
            swept += 1;
        }
        debug!(positions = swept, "full sweep enqueued");
    }
}

#[async_trait]
impl PeriodicTask for FullSweep {
    fn name(&self) -> &'static str {
        "full-sweep"
    }

    async fn run_cycle(&mut self) {
        self.run_once().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::domain::{Address, Asset, NewLot};
    use crate::feeds::MockPlayerFeed;
    use crate::fleet::KeyFleet;
    use crate::notify::Notifier;
    use crate::orders::{ProposalStore, RecencyStore};
    use crate::rules::{builtin_registries, Services, WhitelistStore};
    use tempfile::TempDir;

    fn services(dir: &TempDir, ledger: PositionLedger) -> Arc<Services> {
        let chain = Arc::new(MockChainClient::new());
        Arc::new(Services {
            ledger,
            chain: chain.clone(),
            proposals: ProposalStore::open(dir.path().join("orders")).unwrap(),
            recency: RecencyStore::open(dir.path().join("recency")).unwrap(),
            whitelists: WhitelistStore::open(dir.path().join("whitelists")).unwrap(),
            fleet: Arc::new(KeyFleet::new(vec![Address::new("0xaaa")], chain, 0, 0)),
            feed: Arc::new(MockPlayerFeed::new()),
            notifier: Notifier::disabled(),
        })
    }

    #[tokio::test]
    async fn test_sweep_only_visits_open_positions() {
        let dir = TempDir::new().unwrap();
        let ledger = PositionLedger::open(dir.path().join("ledger")).unwrap();
        let holder = Address::new("0xaaa");
        ledger.add_holder(&holder).unwrap();
        ledger
            .add_lot(
                &holder,
                &Asset::new("0xfff"),
                NewLot {
                    quantity: 5,
                    cost_wei: 500,
                    purchase_block: 10,
                    supply_at_purchase: 5,
                },
            )
            .unwrap();

        let svc = services(&dir, ledger.clone());
        let engine = Arc::new(RuleEngine::new(
            Vec::new(),
            Vec::new(),
            builtin_registries(),
            svc,
        ));
        let (invoker, _worker) = RuleInvoker::spawn();
        let sweep = FullSweep::new(ledger, engine, invoker.clone(), false);

        // No rules are loaded, so the sweep just has to enqueue and drain
        // cleanly without errors.
        sweep.run_once().await;
        invoker.flush().await;
    }
}
