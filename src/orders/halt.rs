//! Operator kill-switch: a marker file checked between proposals.

use std::fs;
use std::path::PathBuf;

use super::OrderStoreError;

#[derive(Debug, Clone)]
pub struct HaltFlag {
    path: PathBuf,
}

impl HaltFlag {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// True while the operator has execution halted.
    pub fn is_halted(&self) -> bool {
        self.path.exists()
    }

    pub fn engage(&self) -> Result<(), OrderStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, "")?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), OrderStoreError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
