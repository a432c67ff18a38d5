//! Off-chain player data feeds.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

use crate::domain::{Address, TimeMs};

pub mod http;
pub mod mock;
pub mod watcher;

pub use http::HttpPlayerFeed;
pub use mock::MockPlayerFeed;
pub use watcher::NewUserWatcher;

/// Error type for feed operations. Feed failures are never fatal; the
/// affected cycle is skipped and retried on the next interval.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    #[error("network error: {0}")]
    Network(String),
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("rate limited")]
    RateLimited,
}

/// One player's stats as served by the off-chain API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerStats {
    pub wallet: Address,
    /// Fraction of games won, in `[0, 1]`.
    pub win_rate: f64,
    pub kills: u64,
    pub games_played: u64,
    pub created_ms: TimeMs,
}

/// A row of the paged new-player listing, sorted by creation time descending.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerRecord {
    pub wallet: Address,
    pub created_ms: TimeMs,
}

/// Player data source: paged listing plus single-record lookup by wallet.
#[async_trait]
pub trait PlayerFeed: Send + Sync + fmt::Debug {
    /// One page of players, newest first. An empty page means past the end.
    async fn new_players(&self, page: u32) -> Result<Vec<PlayerRecord>, FeedError>;

    /// Stats for one wallet, or `None` if the player is unknown.
    async fn player_stats(&self, wallet: &Address) -> Result<Option<PlayerStats>, FeedError>;
}
