//! Filesystem-backed order state shared between the two processes.
//!
//! The indexing process and the execution process coordinate only through
//! these stores: proposal files plus alert markers, one pending-order record
//! per holder, per-asset trade recency, and the operator halt marker. All
//! writes are atomic (temp file + rename) so either process can crash and
//! restart without corrupting the other's view.

use std::fs;
use std::path::Path;

use thiserror::Error;

pub mod halt;
pub mod pending;
pub mod proposals;
pub mod recency;

pub use halt::HaltFlag;
pub use pending::PendingOrderStore;
pub use proposals::ProposalStore;
pub use recency::{RecencyRecord, RecencyStore};

#[derive(Debug, Error)]
pub enum OrderStoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("corrupt order file {path}: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },
    #[error("holder {0} already has a pending order")]
    AlreadyPending(crate::domain::Address),
}

/// Write-temp-then-rename, shared by every store in this module.
pub(crate) fn write_atomic(path: &Path, data: &str) -> Result<(), OrderStoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
