//! Key fleet: the fixed set of operator-controlled signing addresses.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::chain::{ChainClient, ChainError};
use crate::domain::Address;

pub mod slots;

pub use slots::{SlotCoordinator, SlotError};

#[derive(Debug, Error)]
pub enum FleetError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("bad fleet file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("fleet file {0} lists no addresses")]
    Empty(String),
}

/// Fleet membership plus balance floors. Loaded once; immutable for the
/// process lifetime. Signing is delegated to the node that owns the keys.
#[derive(Debug)]
pub struct KeyFleet {
    addresses: Vec<Address>,
    chain: Arc<dyn ChainClient>,
    /// Fixed gas floor in wei, the fallback when no gas-limit estimate applies.
    min_gas_wei: u128,
    /// Token balance floor in wei.
    min_token_wei: u128,
}

impl KeyFleet {
    pub fn new(
        addresses: Vec<Address>,
        chain: Arc<dyn ChainClient>,
        min_gas_wei: u128,
        min_token_wei: u128,
    ) -> Self {
        Self {
            addresses,
            chain,
            min_gas_wei,
            min_token_wei,
        }
    }

    /// Load fleet membership from a JSON array of address strings.
    pub fn load(
        path: &Path,
        chain: Arc<dyn ChainClient>,
        min_gas_wei: u128,
        min_token_wei: u128,
    ) -> Result<Self, FleetError> {
        let data = fs::read_to_string(path)?;
        let raw: Vec<String> = serde_json::from_str(&data).map_err(|source| FleetError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        if raw.is_empty() {
            return Err(FleetError::Empty(path.display().to_string()));
        }
        let addresses = raw.into_iter().map(Address::new).collect();
        Ok(Self::new(addresses, chain, min_gas_wei, min_token_wei))
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn is_member(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    /// Gas check against the fixed configured floor.
    pub async fn meets_minimum_gas_fixed(&self, address: &Address) -> Result<bool, ChainError> {
        Ok(self.chain.gas_balance(address).await? >= self.min_gas_wei)
    }

    /// Gas check against live network price times a gas-limit estimate.
    ///
    /// The operationally correct variant: a fixed floor can be wrong in
    /// either direction when fees move.
    pub async fn meets_minimum_gas(
        &self,
        address: &Address,
        gas_limit: u64,
    ) -> Result<bool, ChainError> {
        let price = self.chain.gas_price().await?;
        let needed = price.saturating_mul(gas_limit as u128);
        Ok(self.chain.gas_balance(address).await? >= needed)
    }

    pub async fn meets_minimum_token(&self, address: &Address) -> Result<bool, ChainError> {
        Ok(self.chain.token_balance(address).await? >= self.min_token_wei)
    }
}
