//! Order proposal store: per-asset proposal files plus alert markers.
//!
//! Layout per direction: `<root>/<side>/alerts/<asset>` marker files and
//! `<root>/<side>/proposals/<asset>/<created_ms>-<uuid>.json` proposal files.
//! The proposal is written before its alert so a consumer can never observe
//! an alert without a readable proposal behind it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::domain::{Asset, ProposedOrder, Side};

use super::{write_atomic, OrderStoreError};

#[derive(Debug, Clone)]
pub struct ProposalStore {
    root: PathBuf,
}

impl ProposalStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, OrderStoreError> {
        let root = root.into();
        for side in [Side::Buy, Side::Sell] {
            fs::create_dir_all(root.join(side.as_str()).join("alerts"))?;
            fs::create_dir_all(root.join(side.as_str()).join("proposals"))?;
        }
        Ok(Self { root })
    }

    fn alerts_dir(&self, side: Side) -> PathBuf {
        self.root.join(side.as_str()).join("alerts")
    }

    fn asset_dir(&self, side: Side, asset: &Asset) -> PathBuf {
        self.root
            .join(side.as_str())
            .join("proposals")
            .join(asset.as_str())
    }

    /// Persist a proposal, then raise the asset's alert marker.
    pub fn propose(&self, order: &ProposedOrder) -> Result<(), OrderStoreError> {
        let name = format!("{}-{}.json", order.created_ms.as_ms(), Uuid::new_v4());
        let path = self.asset_dir(order.side, &order.asset).join(name);
        let data = serde_json::to_string_pretty(order).expect("proposal serializes");
        write_atomic(&path, &data)?;
        // Alert last: consumers must never see an alert without a proposal.
        self.raise_alert(order.side, &order.asset)?;
        Ok(())
    }

    /// Raise (or re-raise) the alert marker for an asset.
    pub fn raise_alert(&self, side: Side, asset: &Asset) -> Result<(), OrderStoreError> {
        write_atomic(&self.alerts_dir(side).join(asset.as_str()), "")
    }

    /// Take all alerted assets for a direction, deleting the markers.
    ///
    /// Deletion is optimistic: a proposal raised after the marker is removed
    /// is still found by the next cycle's directory scan of its re-raised
    /// alert.
    pub fn take_alerts(&self, side: Side) -> Result<Vec<Asset>, OrderStoreError> {
        let dir = self.alerts_dir(side);
        let mut assets = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".tmp") {
                continue;
            }
            fs::remove_file(entry.path())?;
            assets.push(Asset::new(name));
        }
        assets.sort();
        Ok(assets)
    }

    /// All proposals for an asset, oldest first by file name.
    ///
    /// Unreadable files are skipped with a warning rather than poisoning the
    /// whole cycle.
    pub fn proposals_for(
        &self,
        side: Side,
        asset: &Asset,
    ) -> Result<Vec<(PathBuf, ProposedOrder)>, OrderStoreError> {
        let dir = self.asset_dir(side, asset);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map_or(false, |ext| ext == "json"))
            .collect();
        paths.sort();

        let mut proposals = Vec::new();
        for path in paths {
            match fs::read_to_string(&path)
                .map_err(OrderStoreError::from)
                .and_then(|data| {
                    serde_json::from_str::<ProposedOrder>(&data).map_err(|source| {
                        OrderStoreError::Corrupt {
                            path: path.display().to_string(),
                            source,
                        }
                    })
                }) {
                Ok(order) => proposals.push((path, order)),
                Err(e) => warn!("skipping unreadable proposal: {}", e),
            }
        }
        Ok(proposals)
    }

    /// Delete a consumed or discarded proposal file.
    pub fn remove(&self, path: &Path) -> Result<(), OrderStoreError> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// True if the proposal's age exceeds the stale threshold.
    pub fn is_stale(order: &ProposedOrder, max_age: Duration) -> bool {
        order.created_ms.age_ms() as u128 > max_age.as_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TimeMs, TriggerSource};
    use tempfile::TempDir;

    fn order(asset: &str, side: Side, created_ms: TimeMs) -> ProposedOrder {
        ProposedOrder {
            asset: Asset::new(asset),
            side,
            quantity: 2,
            rule_id: "r1".to_string(),
            trigger: TriggerSource::ChainEvent,
            holder: None,
            created_ms,
        }
    }

    #[test]
    fn test_propose_then_alert_then_take() {
        let dir = TempDir::new().unwrap();
        let store = ProposalStore::open(dir.path()).unwrap();

        store.propose(&order("0xfff", Side::Buy, TimeMs::now())).unwrap();

        let alerted = store.take_alerts(Side::Buy).unwrap();
        assert_eq!(alerted, vec![Asset::new("0xfff")]);
        // Marker consumed; proposals remain until explicitly removed.
        assert!(store.take_alerts(Side::Buy).unwrap().is_empty());
        let proposals = store.proposals_for(Side::Buy, &Asset::new("0xfff")).unwrap();
        assert_eq!(proposals.len(), 1);

        store.remove(&proposals[0].0).unwrap();
        assert!(store
            .proposals_for(Side::Buy, &Asset::new("0xfff"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_proposals_ordered_oldest_first() {
        let dir = TempDir::new().unwrap();
        let store = ProposalStore::open(dir.path()).unwrap();
        let asset = Asset::new("0xfff");

        store.propose(&order("0xfff", Side::Sell, TimeMs::new(2000))).unwrap();
        store.propose(&order("0xfff", Side::Sell, TimeMs::new(1000))).unwrap();

        let proposals = store.proposals_for(Side::Sell, &asset).unwrap();
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].1.created_ms, TimeMs::new(1000));
    }

    #[test]
    fn test_staleness() {
        let fresh = order("0xfff", Side::Buy, TimeMs::now());
        let old = order("0xfff", Side::Buy, TimeMs::new(0));
        let max_age = Duration::from_secs(600);
        assert!(!ProposalStore::is_stale(&fresh, max_age));
        assert!(ProposalStore::is_stale(&old, max_age));
    }

    #[test]
    fn test_sides_are_independent() {
        let dir = TempDir::new().unwrap();
        let store = ProposalStore::open(dir.path()).unwrap();

        store.propose(&order("0xfff", Side::Buy, TimeMs::now())).unwrap();
        assert!(store.take_alerts(Side::Sell).unwrap().is_empty());
        assert_eq!(store.take_alerts(Side::Buy).unwrap().len(), 1);
    }
}
