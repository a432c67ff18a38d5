//! File-addressed position ledger.
//!
//! One JSON book per (holder, asset) holding the active and archived lots.
//! The chain's event log is the source of truth; this store is a derived
//! index that can always be wiped and rebuilt by replay. Every mutation is
//! written via write-temp-then-atomic-rename so a crash mid-write can never
//! leave a torn book behind.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Address, Asset, Lot, NewLot};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("corrupt ledger file {path}: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },
    #[error("block order violation for {holder}/{asset}: block {block} precedes {prior}")]
    InvalidBlockOrder {
        holder: Address,
        asset: Asset,
        block: u64,
        prior: u64,
    },
    #[error("lot {seq} of {holder}/{asset} holds {remaining}, cannot consume {requested}")]
    InsufficientLotBalance {
        holder: Address,
        asset: Asset,
        seq: u64,
        requested: u64,
        remaining: u64,
    },
    #[error("{holder}/{asset} holds {held} across all lots, cannot sell {requested}")]
    InsufficientBits {
        holder: Address,
        asset: Asset,
        requested: u64,
        held: u64,
    },
    #[error("no active lot {seq} for {holder}/{asset}")]
    UnknownLot {
        holder: Address,
        asset: Asset,
        seq: u64,
    },
}

/// Per-(holder, asset) lot book as persisted on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LotBook {
    next_seq: u64,
    active: Vec<Lot>,
    archived: Vec<Lot>,
}

impl LotBook {
    fn last_purchase_block(&self) -> Option<u64> {
        self.active
            .iter()
            .chain(self.archived.iter())
            .map(|l| l.purchase_block)
            .max()
    }
}

/// Optional filters for lot queries used by quantity functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LotFilter {
    /// Keep lots whose per-share purchase cost is at most this.
    pub max_unit_cost_wei: Option<u128>,
    /// Keep lots purchased at or before this block.
    pub max_purchase_block: Option<u64>,
}

/// One (holder, asset) entry of a full ledger snapshot.
#[derive(Debug, Clone)]
pub struct PositionEntry {
    pub holder: Address,
    pub asset: Asset,
    pub active: Vec<Lot>,
    pub archived: Vec<Lot>,
}

/// Durable lot store rooted at a directory.
#[derive(Debug, Clone)]
pub struct PositionLedger {
    root: PathBuf,
}

impl PositionLedger {
    /// Open (and create if absent) a ledger rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn holder_dir(&self, holder: &Address) -> PathBuf {
        self.root.join(holder.as_str())
    }

    fn book_path(&self, holder: &Address, asset: &Asset) -> PathBuf {
        self.holder_dir(holder).join(format!("{}.json", asset))
    }

    fn load_book(&self, path: &Path) -> Result<LotBook, LedgerError> {
        if !path.exists() {
            return Ok(LotBook::default());
        }
        let data = fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|source| LedgerError::Corrupt {
            path: path.display().to_string(),
            source,
        })
    }

    fn write_book(&self, path: &Path, book: &LotBook) -> Result<(), LedgerError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(book).expect("lot book serializes");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Idempotently ensure the holder's storage namespace exists.
    pub fn add_holder(&self, holder: &Address) -> Result<(), LedgerError> {
        fs::create_dir_all(self.holder_dir(holder))?;
        Ok(())
    }

    /// Append a new lot, assigning it the next sequence number.
    ///
    /// Purchase events must be indexed in non-decreasing block order per
    /// (holder, asset); an out-of-order block is rejected.
    pub fn add_lot(
        &self,
        holder: &Address,
        asset: &Asset,
        new: NewLot,
    ) -> Result<u64, LedgerError> {
        let path = self.book_path(holder, asset);
        let mut book = self.load_book(&path)?;

        if let Some(prior) = book.last_purchase_block() {
            if new.purchase_block < prior {
                return Err(LedgerError::InvalidBlockOrder {
                    holder: holder.clone(),
                    asset: asset.clone(),
                    block: new.purchase_block,
                    prior,
                });
            }
        }

        let seq = book.next_seq;
        book.next_seq += 1;
        book.active.push(Lot {
            seq,
            initial_quantity: new.quantity,
            remaining_quantity: new.quantity,
            cost_wei: new.cost_wei,
            purchase_block: new.purchase_block,
            sale_block: None,
            sale_proceeds_wei: 0,
            supply_at_purchase: new.supply_at_purchase,
        });

        self.write_book(&path, &book)?;
        Ok(seq)
    }

    /// Deduct `quantity` from an active lot, accumulating sale proceeds.
    ///
    /// The lot is archived once its remaining quantity reaches zero. Sale
    /// blocks must not precede the lot's purchase block or a previously
    /// recorded sale block.
    pub fn consume_lot(
        &self,
        holder: &Address,
        asset: &Asset,
        seq: u64,
        quantity: u64,
        sale_block: u64,
        sale_proceeds_wei: u128,
    ) -> Result<(), LedgerError> {
        let path = self.book_path(holder, asset);
        let mut book = self.load_book(&path)?;

        let idx = book
            .active
            .iter()
            .position(|l| l.seq == seq)
            .ok_or_else(|| LedgerError::UnknownLot {
                holder: holder.clone(),
                asset: asset.clone(),
                seq,
            })?;

        let lot = &mut book.active[idx];
        let prior = lot.sale_block.unwrap_or(lot.purchase_block);
        if sale_block < prior {
            return Err(LedgerError::InvalidBlockOrder {
                holder: holder.clone(),
                asset: asset.clone(),
                block: sale_block,
                prior,
            });
        }
        if quantity > lot.remaining_quantity {
            return Err(LedgerError::InsufficientLotBalance {
                holder: holder.clone(),
                asset: asset.clone(),
                seq,
                requested: quantity,
                remaining: lot.remaining_quantity,
            });
        }

        lot.remaining_quantity -= quantity;
        lot.sale_block = Some(sale_block);
        lot.sale_proceeds_wei += sale_proceeds_wei;

        if lot.is_depleted() {
            let depleted = book.active.remove(idx);
            book.archived.push(depleted);
        }

        self.write_book(&path, &book)?;
        Ok(())
    }

    /// Active lots in ascending sequence order (FIFO consumption order).
    pub fn lots_ascending(&self, holder: &Address, asset: &Asset) -> Result<Vec<Lot>, LedgerError> {
        let mut lots = self.load_book(&self.book_path(holder, asset))?.active;
        lots.sort_by_key(|l| l.seq);
        Ok(lots)
    }

    /// Active lots in descending sequence order (newest first).
    pub fn lots_descending(
        &self,
        holder: &Address,
        asset: &Asset,
    ) -> Result<Vec<Lot>, LedgerError> {
        let mut lots = self.lots_ascending(holder, asset)?;
        lots.reverse();
        Ok(lots)
    }

    /// Active lots, ascending, restricted by the given filter.
    pub fn lots_filtered(
        &self,
        holder: &Address,
        asset: &Asset,
        filter: LotFilter,
    ) -> Result<Vec<Lot>, LedgerError> {
        let lots = self.lots_ascending(holder, asset)?;
        Ok(lots
            .into_iter()
            .filter(|l| {
                filter
                    .max_unit_cost_wei
                    .map_or(true, |max| l.unit_cost_wei() <= max)
                    && filter
                        .max_purchase_block
                        .map_or(true, |max| l.purchase_block <= max)
            })
            .collect())
    }

    /// Sum of remaining quantity across active lots.
    pub fn held_quantity(&self, holder: &Address, asset: &Asset) -> Result<u64, LedgerError> {
        Ok(self
            .lots_ascending(holder, asset)?
            .iter()
            .map(|l| l.remaining_quantity)
            .sum())
    }

    /// Assets with at least one lot (active or archived) for a holder.
    pub fn assets_of(&self, holder: &Address) -> Result<Vec<Asset>, LedgerError> {
        let dir = self.holder_dir(holder);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut assets = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(".json") {
                assets.push(Asset::new(stem));
            }
        }
        assets.sort();
        Ok(assets)
    }

    /// Highest block number observed across all lots and sale annotations.
    ///
    /// Deriving the resume point from persisted content (rather than a
    /// separate cursor) keeps it consistent with what actually survived a
    /// crash.
    pub fn latest_indexed_block(&self) -> Result<Option<u64>, LedgerError> {
        let mut latest = None;
        for entry in self.snapshot(None)? {
            for lot in entry.active.iter().chain(entry.archived.iter()) {
                let seen = lot.sale_block.unwrap_or(0).max(lot.purchase_block);
                latest = Some(latest.map_or(seen, |l: u64| l.max(seen)));
            }
        }
        Ok(latest)
    }

    /// Full materialization of the ledger, optionally restricted to one holder.
    pub fn snapshot(
        &self,
        holder_filter: Option<&Address>,
    ) -> Result<Vec<PositionEntry>, LedgerError> {
        let mut entries = Vec::new();
        let mut holders = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            if dir_entry.file_type()?.is_dir() {
                holders.push(Address::new(dir_entry.file_name().to_string_lossy()));
            }
        }
        holders.sort();

        for holder in holders {
            if let Some(filter) = holder_filter {
                if filter != &holder {
                    continue;
                }
            }
            for asset in self.assets_of(&holder)? {
                let book = self.load_book(&self.book_path(&holder, &asset))?;
                entries.push(PositionEntry {
                    holder: holder.clone(),
                    asset,
                    active: book.active,
                    archived: book.archived,
                });
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (PositionLedger, TempDir) {
        let dir = TempDir::new().unwrap();
        let ledger = PositionLedger::open(dir.path().join("ledger")).unwrap();
        (ledger, dir)
    }

    fn new_lot(quantity: u64, cost_wei: u128, block: u64) -> NewLot {
        NewLot {
            quantity,
            cost_wei,
            purchase_block: block,
            supply_at_purchase: 10,
        }
    }

    #[test]
    fn test_add_lot_assigns_sequential_seq() {
        let (ledger, _dir) = setup();
        let holder = Address::new("0xaaa");
        let asset = Asset::new("0xfff");

        assert_eq!(ledger.add_lot(&holder, &asset, new_lot(5, 500, 100)).unwrap(), 0);
        assert_eq!(ledger.add_lot(&holder, &asset, new_lot(3, 400, 101)).unwrap(), 1);
        assert_eq!(ledger.held_quantity(&holder, &asset).unwrap(), 8);
    }

    #[test]
    fn test_add_lot_rejects_block_regression() {
        let (ledger, _dir) = setup();
        let holder = Address::new("0xaaa");
        let asset = Asset::new("0xfff");

        ledger.add_lot(&holder, &asset, new_lot(5, 500, 100)).unwrap();
        let err = ledger.add_lot(&holder, &asset, new_lot(5, 500, 99)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidBlockOrder { .. }));
        // Equal blocks are fine (several purchases can share a block).
        ledger.add_lot(&holder, &asset, new_lot(5, 500, 100)).unwrap();
    }

    #[test]
    fn test_consume_rejects_oversell_of_lot() {
        let (ledger, _dir) = setup();
        let holder = Address::new("0xaaa");
        let asset = Asset::new("0xfff");

        let seq = ledger.add_lot(&holder, &asset, new_lot(5, 500, 100)).unwrap();
        let err = ledger
            .consume_lot(&holder, &asset, seq, 6, 110, 600)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientLotBalance { .. }));
        assert_eq!(ledger.held_quantity(&holder, &asset).unwrap(), 5);
    }

    #[test]
    fn test_consume_rejects_sale_before_purchase() {
        let (ledger, _dir) = setup();
        let holder = Address::new("0xaaa");
        let asset = Asset::new("0xfff");

        let seq = ledger.add_lot(&holder, &asset, new_lot(5, 500, 100)).unwrap();
        let err = ledger
            .consume_lot(&holder, &asset, seq, 1, 99, 100)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidBlockOrder { .. }));
    }

    #[test]
    fn test_partial_consume_accumulates_proceeds_then_archives() {
        let (ledger, _dir) = setup();
        let holder = Address::new("0xaaa");
        let asset = Asset::new("0xfff");

        let seq = ledger.add_lot(&holder, &asset, new_lot(10, 1000, 100)).unwrap();
        ledger.consume_lot(&holder, &asset, seq, 4, 105, 500).unwrap();
        ledger.consume_lot(&holder, &asset, seq, 6, 106, 800).unwrap();

        assert_eq!(ledger.held_quantity(&holder, &asset).unwrap(), 0);
        assert!(ledger.lots_ascending(&holder, &asset).unwrap().is_empty());

        let snapshot = ledger.snapshot(Some(&holder)).unwrap();
        assert_eq!(snapshot.len(), 1);
        let archived = &snapshot[0].archived;
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].sale_proceeds_wei, 1300);
        assert_eq!(archived[0].sale_block, Some(106));
    }

    #[test]
    fn test_latest_indexed_block_covers_sales() {
        let (ledger, _dir) = setup();
        let holder = Address::new("0xaaa");
        let asset = Asset::new("0xfff");

        assert_eq!(ledger.latest_indexed_block().unwrap(), None);
        let seq = ledger.add_lot(&holder, &asset, new_lot(5, 500, 100)).unwrap();
        assert_eq!(ledger.latest_indexed_block().unwrap(), Some(100));
        ledger.consume_lot(&holder, &asset, seq, 2, 140, 300).unwrap();
        assert_eq!(ledger.latest_indexed_block().unwrap(), Some(140));
    }

    #[test]
    fn test_lots_filtered_by_unit_cost() {
        let (ledger, _dir) = setup();
        let holder = Address::new("0xaaa");
        let asset = Asset::new("0xfff");

        ledger.add_lot(&holder, &asset, new_lot(10, 1000, 100)).unwrap(); // 100/share
        ledger.add_lot(&holder, &asset, new_lot(10, 3000, 101)).unwrap(); // 300/share

        let cheap = ledger
            .lots_filtered(
                &holder,
                &asset,
                LotFilter {
                    max_unit_cost_wei: Some(150),
                    max_purchase_block: None,
                },
            )
            .unwrap();
        assert_eq!(cheap.len(), 1);
        assert_eq!(cheap[0].seq, 0);
    }
}
