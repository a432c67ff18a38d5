//! Static address whitelists consulted by optional predicates.

use std::fs;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WhitelistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("bad whitelist file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Directory of named JSON arrays of addresses. A missing list is treated as
/// empty, so `asset_whitelisted` is false and `asset_blacklisted` is true
/// against a list that was never provisioned.
#[derive(Debug, Clone)]
pub struct WhitelistStore {
    root: PathBuf,
}

impl WhitelistStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, WhitelistError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn contains(&self, list: &str, address: &str) -> Result<bool, WhitelistError> {
        let path = self.root.join(format!("{}.json", list));
        if !path.exists() {
            return Ok(false);
        }
        let data = fs::read_to_string(&path)?;
        let entries: Vec<String> =
            serde_json::from_str(&data).map_err(|source| WhitelistError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(entries.iter().any(|e| e.eq_ignore_ascii_case(address)))
    }
}
