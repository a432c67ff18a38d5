//! Per-asset trade recency records, prunable by age.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Asset, Side, TimeMs};

use super::{write_atomic, OrderStoreError};

/// Last observed trade for an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecencyRecord {
    pub last_ms: TimeMs,
    pub side: Side,
    pub block_number: u64,
}

/// One JSON record per asset under the store root.
#[derive(Debug, Clone)]
pub struct RecencyStore {
    root: PathBuf,
}

impl RecencyStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, OrderStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, asset: &Asset) -> PathBuf {
        self.root.join(format!("{}.json", asset))
    }

    pub fn record(&self, asset: &Asset, side: Side, block_number: u64) -> Result<(), OrderStoreError> {
        let record = RecencyRecord {
            last_ms: TimeMs::now(),
            side,
            block_number,
        };
        let data = serde_json::to_string_pretty(&record).expect("recency record serializes");
        write_atomic(&self.path(asset), &data)
    }

    pub fn get(&self, asset: &Asset) -> Result<Option<RecencyRecord>, OrderStoreError> {
        let path = self.path(asset);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        let record = serde_json::from_str(&data).map_err(|source| OrderStoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(record))
    }

    /// Remove records older than `max_age`; returns how many were pruned.
    pub fn prune(&self, max_age: Duration) -> Result<usize, OrderStoreError> {
        let mut pruned = 0;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.extension().map_or(false, |ext| ext == "json") {
                continue;
            }
            let Ok(data) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<RecencyRecord>(&data) else {
                continue;
            };
            if record.last_ms.age_ms() as u128 > max_age.as_millis() {
                fs::remove_file(&path)?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}
