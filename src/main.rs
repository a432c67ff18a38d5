use std::io;
use std::sync::Arc;

use anyhow::Context;

use curvebot::chain::ChainClient;
use curvebot::config::Config;
use curvebot::domain::Address;
use curvebot::exec::{run_periodic, BuyGofer, FullSweep, SellGofer};
use curvebot::feeds::{HttpPlayerFeed, MockPlayerFeed, NewUserWatcher, PlayerFeed};
use curvebot::fleet::{KeyFleet, SlotCoordinator};
use curvebot::indexer::{ChainIndexer, RuleHooks};
use curvebot::ledger::PositionLedger;
use curvebot::notify::Notifier;
use curvebot::orders::{HaltFlag, PendingOrderStore, ProposalStore, RecencyStore};
use curvebot::report::PnlReport;
use curvebot::rules::{builtin_registries, load_rules, RuleEngine, RuleInvoker, Services, WhitelistStore};
use curvebot::JsonRpcChainClient;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("");
    if command.is_empty() {
        eprintln!("Usage: curvebot <indexer|executor|sweep-once|report [holder]>");
        std::process::exit(2);
    }

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match command {
        "indexer" => run_indexer(config).await,
        "executor" => run_executor(config).await,
        "sweep-once" => run_sweep_once(config).await,
        "report" => run_report(config, args.get(2).cloned()),
        other => {
            eprintln!("Unknown command: {}", other);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        tracing::error!("fatal: {:#}", e);
        std::process::exit(1);
    }
}

fn chain_client(config: &Config) -> Arc<dyn ChainClient> {
    Arc::new(JsonRpcChainClient::new(
        config.rpc_url.clone(),
        Address::new(config.market_contract.clone()),
        Address::new(config.token_contract.clone()),
    ))
}

fn player_feed(config: &Config) -> Arc<dyn PlayerFeed> {
    match &config.stats_api_url {
        Some(url) => Arc::new(HttpPlayerFeed::new(url.clone())),
        // No stats API configured: an empty feed keeps stats-based rules
        // inert without special-casing every caller.
        None => Arc::new(MockPlayerFeed::new()),
    }
}

/// Everything the rule-evaluating processes share: stores, fleet, feed, and
/// the compiled engine over them.
struct RuleStack {
    chain: Arc<dyn ChainClient>,
    ledger: PositionLedger,
    pending: PendingOrderStore,
    recency: RecencyStore,
    fleet: Arc<KeyFleet>,
    feed: Arc<dyn PlayerFeed>,
    engine: Arc<RuleEngine>,
}

fn build_rule_stack(config: &Config) -> anyhow::Result<RuleStack> {
    let chain = chain_client(config);
    let ledger = PositionLedger::open(config.ledger_dir()).context("open ledger")?;
    let pending = PendingOrderStore::open(config.pending_dir()).context("open pending store")?;
    let recency = RecencyStore::open(config.recency_dir()).context("open recency store")?;
    let proposals = ProposalStore::open(config.orders_dir()).context("open proposal store")?;
    let whitelists = WhitelistStore::open(config.whitelists_dir()).context("open whitelists")?;
    let fleet = Arc::new(
        KeyFleet::load(
            &config.fleet_file,
            chain.clone(),
            config.min_gas_wei,
            config.min_token_wei,
        )
        .context("load fleet")?,
    );
    let feed = player_feed(config);
    let notifier = Notifier::new(config.webhook_url.clone());

    let registries = builtin_registries();
    let buy_rules = load_rules(&config.buy_rules_file, &registries).context("load buy rules")?;
    let sell_rules =
        load_rules(&config.sell_rules_file, &registries).context("load sell rules")?;
    tracing::info!(
        buy_rules = buy_rules.len(),
        sell_rules = sell_rules.len(),
        "rules loaded"
    );

    let services = Arc::new(Services {
        ledger: ledger.clone(),
        chain: chain.clone(),
        proposals,
        recency: recency.clone(),
        whitelists,
        fleet: fleet.clone(),
        feed: feed.clone(),
        notifier,
    });
    let engine = Arc::new(RuleEngine::new(buy_rules, sell_rules, registries, services));

    Ok(RuleStack {
        chain,
        ledger,
        pending,
        recency,
        fleet,
        feed,
        engine,
    })
}

async fn run_indexer(config: Config) -> anyhow::Result<()> {
    let RuleStack {
        chain,
        ledger,
        pending,
        recency,
        fleet,
        feed,
        engine,
    } = build_rule_stack(&config)?;
    let (invoker, _worker) = RuleInvoker::spawn();

    let sweep = FullSweep::new(
        ledger.clone(),
        engine.clone(),
        invoker.clone(),
        config.sweep_include_buys,
    );
    tokio::spawn(run_periodic(sweep, config.sweep_interval));

    if config.stats_api_url.is_some() {
        let watcher = NewUserWatcher::new(feed, engine.clone(), invoker.clone());
        tokio::spawn(run_periodic(watcher, config.feed_interval));
    }

    {
        let recency = recency.clone();
        let max_age = config.recency_max_age;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                match recency.prune(max_age) {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(pruned = n, "recency records expired"),
                    Err(e) => tracing::warn!("recency prune failed: {}", e),
                }
            }
        });
    }

    let mut indexer = ChainIndexer::new(
        chain,
        ledger,
        pending,
        recency,
        fleet,
        Some(RuleHooks { engine, invoker }),
        config.deployment_block,
        config.index_batch_size,
        config.live_delta_blocks,
        config.indexer_poll,
    )
    .context("start indexer")?;

    indexer.run().await.context("indexer stopped")?;
    Ok(())
}

async fn run_executor(config: Config) -> anyhow::Result<()> {
    let chain = chain_client(&config);
    let proposals = ProposalStore::open(config.orders_dir()).context("open proposal store")?;
    let pending = PendingOrderStore::open(config.pending_dir()).context("open pending store")?;
    let fleet = Arc::new(
        KeyFleet::load(
            &config.fleet_file,
            chain.clone(),
            config.min_gas_wei,
            config.min_token_wei,
        )
        .context("load fleet")?,
    );
    let slots = Arc::new(SlotCoordinator::new(
        fleet.clone(),
        chain.clone(),
        pending,
        config.max_pending_age,
        config.low_balance_ttl,
    ));
    let halt = HaltFlag::new(config.halt_path());
    let notifier = Notifier::new(config.webhook_url.clone());
    if config.simulation {
        tracing::warn!("simulation mode: transactions will not reach the chain");
    }

    let buy = BuyGofer::new(
        proposals.clone(),
        slots.clone(),
        chain.clone(),
        halt.clone(),
        notifier.clone(),
        config.stale_order_after,
        config.gas_limit_buy,
        config.simulation,
        config.halt_log_every,
    );
    let sell = SellGofer::new(
        proposals,
        slots,
        chain,
        fleet,
        halt,
        notifier,
        config.stale_order_after,
        config.gas_limit_sell,
        config.simulation,
        config.halt_log_every,
    );

    let buy_task = tokio::spawn(run_periodic(buy, config.gofer_delay));
    let sell_task = tokio::spawn(run_periodic(sell, config.gofer_delay));
    let (buy_result, sell_result) = tokio::join!(buy_task, sell_task);
    buy_result.context("buy gofer task")?;
    sell_result.context("sell gofer task")?;
    Ok(())
}

/// One sweep pass over every open position, drained to completion.
async fn run_sweep_once(config: Config) -> anyhow::Result<()> {
    let stack = build_rule_stack(&config)?;
    let (invoker, _worker) = RuleInvoker::spawn();
    let sweep = FullSweep::new(
        stack.ledger,
        stack.engine,
        invoker.clone(),
        config.sweep_include_buys,
    );
    sweep.run_once().await;
    invoker.flush().await;
    Ok(())
}

fn run_report(config: Config, holder: Option<String>) -> anyhow::Result<()> {
    let ledger = PositionLedger::open(config.ledger_dir()).context("open ledger")?;
    let holder = holder.map(Address::new);
    let report = PnlReport::build(&ledger, holder.as_ref()).context("build report")?;
    report.write_csv(io::stdout()).context("write report")?;
    Ok(())
}
