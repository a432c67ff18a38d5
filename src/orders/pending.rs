//! Pending-order store: one record per holder, the slot mutual exclusion.

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{Address, PendingOrder, PendingStatus};

use super::{write_atomic, OrderStoreError};

/// One file per holder under the store root; presence makes the slot busy.
#[derive(Debug, Clone)]
pub struct PendingOrderStore {
    root: PathBuf,
}

impl PendingOrderStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, OrderStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, holder: &Address) -> PathBuf {
        self.root.join(format!("{}.json", holder))
    }

    /// Record an in-flight transaction for a holder.
    ///
    /// Refuses to overwrite an existing record: the caller must have observed
    /// a free slot first, so an existing file means two dispatch paths raced.
    pub fn record(&self, order: &PendingOrder) -> Result<(), OrderStoreError> {
        let path = self.path(&order.holder);
        if path.exists() {
            return Err(OrderStoreError::AlreadyPending(order.holder.clone()));
        }
        let data = serde_json::to_string_pretty(order).expect("pending order serializes");
        write_atomic(&path, &data)
    }

    pub fn get(&self, holder: &Address) -> Result<Option<PendingOrder>, OrderStoreError> {
        let path = self.path(holder);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        let order =
            serde_json::from_str(&data).map_err(|source| OrderStoreError::Corrupt {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Some(order))
    }

    /// Mark the holder's pending order mined if the hash matches.
    ///
    /// The file is kept; deletion is deferred to the next refresh so the
    /// "did this holder's last tx land" signal stays readable.
    pub fn mark_mined(&self, holder: &Address, tx_hash: &str) -> Result<bool, OrderStoreError> {
        let Some(mut order) = self.get(holder)? else {
            return Ok(false);
        };
        if order.tx_hash != tx_hash {
            return Ok(false);
        }
        order.status = PendingStatus::Mined;
        let data = serde_json::to_string_pretty(&order).expect("pending order serializes");
        write_atomic(&self.path(holder), &data)?;
        Ok(true)
    }

    pub fn remove(&self, holder: &Address) -> Result<(), OrderStoreError> {
        let path = self.path(holder);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// All pending orders currently on disk.
    pub fn list(&self) -> Result<Vec<PendingOrder>, OrderStoreError> {
        let mut orders = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                if let Some(name) = holder_from_path(&path) {
                    if let Some(order) = self.get(&name)? {
                        orders.push(order);
                    }
                }
            }
        }
        orders.sort_by(|a, b| a.holder.cmp(&b.holder));
        Ok(orders)
    }
}

fn holder_from_path(path: &Path) -> Option<Address> {
    path.file_stem()
        .map(|stem| Address::new(stem.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, Side, TimeMs};
    use tempfile::TempDir;

    fn pending(holder: &str, tx_hash: &str) -> PendingOrder {
        PendingOrder {
            holder: Address::new(holder),
            asset: Asset::new("0xfff"),
            side: Side::Buy,
            quantity: 2,
            tx_hash: tx_hash.to_string(),
            nonce: 5,
            submitted_ms: TimeMs::now(),
            status: PendingStatus::Pending,
        }
    }

    #[test]
    fn test_record_is_exclusive_per_holder() {
        let dir = TempDir::new().unwrap();
        let store = PendingOrderStore::open(dir.path()).unwrap();

        store.record(&pending("0xaaa", "0x1")).unwrap();
        let err = store.record(&pending("0xaaa", "0x2")).unwrap_err();
        assert!(matches!(err, OrderStoreError::AlreadyPending(_)));
        // A different holder is unaffected.
        store.record(&pending("0xbbb", "0x3")).unwrap();
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_mark_mined_requires_matching_hash() {
        let dir = TempDir::new().unwrap();
        let store = PendingOrderStore::open(dir.path()).unwrap();
        let holder = Address::new("0xaaa");

        store.record(&pending("0xaaa", "0x1")).unwrap();
        assert!(!store.mark_mined(&holder, "0x999").unwrap());
        assert_eq!(
            store.get(&holder).unwrap().unwrap().status,
            PendingStatus::Pending
        );

        assert!(store.mark_mined(&holder, "0x1").unwrap());
        assert_eq!(
            store.get(&holder).unwrap().unwrap().status,
            PendingStatus::Mined
        );
    }

    #[test]
    fn test_remove_frees_the_slot() {
        let dir = TempDir::new().unwrap();
        let store = PendingOrderStore::open(dir.path()).unwrap();
        let holder = Address::new("0xaaa");

        store.record(&pending("0xaaa", "0x1")).unwrap();
        store.remove(&holder).unwrap();
        assert!(store.get(&holder).unwrap().is_none());
        store.record(&pending("0xaaa", "0x2")).unwrap();
    }
}
