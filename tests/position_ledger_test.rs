//! Lot accounting scenarios driven through the chain indexer.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use curvebot::chain::MockChainClient;
use curvebot::domain::{Address, Asset, Side, TradeEvent};
use curvebot::fleet::KeyFleet;
use curvebot::indexer::ChainIndexer;
use curvebot::ledger::PositionLedger;
use curvebot::orders::{PendingOrderStore, RecencyStore};
use curvebot::report::PnlReport;

fn event(block: u64, side: Side, quantity: u64, wei: u128) -> TradeEvent {
    TradeEvent {
        block_number: block,
        tx_hash: format!("0xtx{}", block),
        trader: Address::new("0xholder"),
        asset: Asset::new("0xplayer"),
        side,
        quantity,
        wei,
        supply: 100,
    }
}

fn indexer_over(
    dir: &TempDir,
    chain: Arc<MockChainClient>,
    ledger: PositionLedger,
) -> ChainIndexer {
    let fleet = Arc::new(KeyFleet::new(
        vec![Address::new("0xholder")],
        chain.clone(),
        0,
        0,
    ));
    ChainIndexer::new(
        chain,
        ledger,
        PendingOrderStore::open(dir.path().join("pending")).unwrap(),
        RecencyStore::open(dir.path().join("recency")).unwrap(),
        fleet,
        None,
        1,
        1000,
        3,
        Duration::from_millis(1),
    )
    .unwrap()
}

#[tokio::test]
async fn test_fifo_sell_spans_lots_and_splits_proceeds() {
    let dir = TempDir::new().unwrap();
    let chain = Arc::new(MockChainClient::new().with_head(110).with_events(vec![
        event(100, Side::Buy, 12, 1200),
        event(105, Side::Buy, 15, 1800),
        event(110, Side::Sell, 20, 3000),
    ]));
    let ledger = PositionLedger::open(dir.path().join("ledger")).unwrap();
    let mut indexer = indexer_over(&dir, chain, ledger.clone());
    indexer.step().await.unwrap();

    let holder = Address::new("0xholder");
    let asset = Asset::new("0xplayer");

    // First lot fully consumed and archived; second has 7 of 15 left.
    let active = ledger.lots_ascending(&holder, &asset).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].initial_quantity, 15);
    assert_eq!(active[0].remaining_quantity, 7);

    let snapshot = ledger.snapshot(Some(&holder)).unwrap();
    assert_eq!(snapshot.len(), 1);
    let archived = &snapshot[0].archived;
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].initial_quantity, 12);
    assert!(archived[0].is_depleted());

    // Proceeds split 12/20 and 8/20 of 3000, exactly.
    assert_eq!(archived[0].sale_proceeds_wei, 1800);
    assert_eq!(active[0].sale_proceeds_wei, 1200);
    assert_eq!(
        archived[0].sale_proceeds_wei + active[0].sale_proceeds_wei,
        3000
    );
}

#[tokio::test]
async fn test_ledger_survives_reopen_and_resumes_past_indexed_blocks() {
    let dir = TempDir::new().unwrap();
    let chain = Arc::new(
        MockChainClient::new()
            .with_head(50)
            .with_event(event(42, Side::Buy, 4, 400)),
    );
    {
        let ledger = PositionLedger::open(dir.path().join("ledger")).unwrap();
        let mut indexer = indexer_over(&dir, chain.clone(), ledger);
        indexer.step().await.unwrap();
    }

    // A fresh process over the same directory sees the lot and does not
    // replay block 42.
    let ledger = PositionLedger::open(dir.path().join("ledger")).unwrap();
    assert_eq!(ledger.latest_indexed_block().unwrap(), Some(42));
    let indexer = indexer_over(&dir, chain, ledger.clone());
    assert_eq!(indexer.next_block(), 43);
    assert_eq!(
        ledger
            .held_quantity(&Address::new("0xholder"), &Asset::new("0xplayer"))
            .unwrap(),
        4
    );
}

#[tokio::test]
async fn test_report_reflects_partial_round_trip() {
    let dir = TempDir::new().unwrap();
    let chain = Arc::new(MockChainClient::new().with_head(120).with_events(vec![
        event(100, Side::Buy, 10, 1000),
        event(110, Side::Sell, 4, 600),
    ]));
    let ledger = PositionLedger::open(dir.path().join("ledger")).unwrap();
    let mut indexer = indexer_over(&dir, chain, ledger.clone());
    indexer.step().await.unwrap();

    let report = PnlReport::build(&ledger, None).unwrap();
    assert_eq!(report.rows.len(), 1);
    let row = &report.rows[0];
    assert_eq!(row.open_quantity, 6);
    assert_eq!(row.open_cost_wei, 600);
    assert_eq!(row.realized_cost_wei, 400);
    assert_eq!(row.realized_proceeds_wei, 600);
    assert_eq!(row.realized_pnl_wei, 200);
}
