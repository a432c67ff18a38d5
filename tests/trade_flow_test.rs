//! Full order lifecycle: proposal, dispatch, confirmation, slot release.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use curvebot::chain::MockChainClient;
use curvebot::domain::{Address, Asset, PendingStatus, ProposedOrder, Side, TimeMs, TradeEvent, TriggerSource};
use curvebot::exec::{BuyGofer, SellGofer};
use curvebot::fleet::{KeyFleet, SlotCoordinator};
use curvebot::indexer::ChainIndexer;
use curvebot::ledger::PositionLedger;
use curvebot::notify::Notifier;
use curvebot::orders::{HaltFlag, PendingOrderStore, ProposalStore, RecencyStore};

struct Rig {
    chain: Arc<MockChainClient>,
    fleet: Arc<KeyFleet>,
    proposals: ProposalStore,
    pending: PendingOrderStore,
    slots: Arc<SlotCoordinator>,
    ledger: PositionLedger,
    halt: HaltFlag,
    dir: TempDir,
}

fn holder() -> Address {
    Address::new("0xholder")
}

fn asset() -> Asset {
    Asset::new("0xplayer")
}

fn rig() -> Rig {
    let dir = TempDir::new().unwrap();
    let chain = Arc::new(MockChainClient::new().with_gas_price(1));
    chain.set_gas_balance(&holder(), 100_000_000);
    chain.set_token_balance(&holder(), 1_000_000);
    let fleet = Arc::new(KeyFleet::new(vec![holder()], chain.clone(), 100, 100));
    let proposals = ProposalStore::open(dir.path().join("orders")).unwrap();
    let pending = PendingOrderStore::open(dir.path().join("pending")).unwrap();
    let slots = Arc::new(SlotCoordinator::new(
        fleet.clone(),
        chain.clone(),
        pending.clone(),
        Duration::from_secs(600),
        Duration::from_secs(30),
    ));
    let ledger = PositionLedger::open(dir.path().join("ledger")).unwrap();
    let halt = HaltFlag::new(dir.path().join("HALT"));
    Rig {
        chain,
        fleet,
        proposals,
        pending,
        slots,
        ledger,
        halt,
        dir,
    }
}

fn buy_gofer(r: &Rig) -> BuyGofer {
    BuyGofer::new(
        r.proposals.clone(),
        r.slots.clone(),
        r.chain.clone(),
        r.halt.clone(),
        Notifier::disabled(),
        Duration::from_secs(600),
        250_000,
        false,
        Duration::from_secs(300),
    )
}

fn sell_gofer(r: &Rig) -> SellGofer {
    SellGofer::new(
        r.proposals.clone(),
        r.slots.clone(),
        r.chain.clone(),
        r.fleet.clone(),
        r.halt.clone(),
        Notifier::disabled(),
        Duration::from_secs(600),
        150_000,
        false,
        Duration::from_secs(300),
    )
}

fn indexer(r: &Rig) -> ChainIndexer {
    ChainIndexer::new(
        r.chain.clone(),
        r.ledger.clone(),
        r.pending.clone(),
        RecencyStore::open(r.dir.path().join("recency")).unwrap(),
        r.fleet.clone(),
        None,
        1,
        1000,
        3,
        Duration::from_millis(1),
    )
    .unwrap()
}

fn proposal(side: Side, quantity: u64, with_holder: bool) -> ProposedOrder {
    ProposedOrder {
        asset: asset(),
        side,
        quantity,
        rule_id: "r1".to_string(),
        trigger: TriggerSource::ChainEvent,
        holder: with_holder.then(holder),
        created_ms: TimeMs::now(),
    }
}

#[tokio::test]
async fn test_buy_confirmation_releases_slot_for_next_order() {
    let r = rig();
    r.chain.set_buy_unit_price(&asset(), 100);
    r.proposals.propose(&proposal(Side::Buy, 3, false)).unwrap();

    // Dispatch the buy; the holder's slot is now occupied.
    buy_gofer(&r).run_once().await;
    let recorded = r.pending.get(&holder()).unwrap().unwrap();
    assert_eq!(recorded.status, PendingStatus::Pending);
    assert_eq!(r.slots.select_free_slot(100).await.unwrap(), None);

    // The transaction lands on chain with the hash the mock handed out.
    r.chain.set_head(10);
    r.chain.push_event(TradeEvent {
        block_number: 7,
        tx_hash: recorded.tx_hash.clone(),
        trader: holder(),
        asset: asset(),
        side: Side::Buy,
        quantity: 3,
        wei: 300,
        supply: 10,
    });
    indexer(&r).step().await.unwrap();

    // Mined mark is visible, the lot exists, and the slot frees on refresh.
    assert_eq!(
        r.pending.get(&holder()).unwrap().unwrap().status,
        PendingStatus::Mined
    );
    assert_eq!(r.ledger.held_quantity(&holder(), &asset()).unwrap(), 3);
    assert_eq!(
        r.slots.select_free_slot(100).await.unwrap(),
        Some(holder())
    );
}

#[tokio::test]
async fn test_buy_then_sell_round_trip_through_both_gofers() {
    let r = rig();
    r.chain.set_buy_unit_price(&asset(), 100);
    r.proposals.propose(&proposal(Side::Buy, 3, false)).unwrap();
    buy_gofer(&r).run_once().await;

    let buy_hash = r.pending.get(&holder()).unwrap().unwrap().tx_hash;
    r.chain.set_head(10);
    r.chain.push_event(TradeEvent {
        block_number: 7,
        tx_hash: buy_hash,
        trader: holder(),
        asset: asset(),
        side: Side::Buy,
        quantity: 3,
        wei: 300,
        supply: 10,
    });
    indexer(&r).step().await.unwrap();
    r.chain.set_shares_balance(&asset(), &holder(), 3);

    // Sell everything back. The mined marker clears on the busy check.
    r.proposals.propose(&proposal(Side::Sell, 3, true)).unwrap();
    sell_gofer(&r).run_once().await;

    let subs = r.chain.submissions();
    assert_eq!(subs.len(), 2);
    assert_eq!(subs[1].side, Side::Sell);
    assert_eq!(subs[1].quantity, 3);
    assert_eq!(
        r.pending.get(&holder()).unwrap().unwrap().side,
        Side::Sell
    );
}

#[tokio::test]
async fn test_halt_blocks_both_gofers() {
    let r = rig();
    r.chain.set_buy_unit_price(&asset(), 100);
    r.chain.set_shares_balance(&asset(), &holder(), 5);
    r.proposals.propose(&proposal(Side::Buy, 2, false)).unwrap();
    r.proposals.propose(&proposal(Side::Sell, 2, true)).unwrap();
    r.halt.engage().unwrap();

    buy_gofer(&r).run_once().await;
    sell_gofer(&r).run_once().await;
    assert!(r.chain.submissions().is_empty());
    assert!(r.pending.get(&holder()).unwrap().is_none());

    // Clearing the halt lets the next cycles drain both sides.
    r.halt.clear().unwrap();
    buy_gofer(&r).run_once().await;
    assert_eq!(r.chain.submissions().len(), 1);
}
