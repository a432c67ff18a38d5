//! Mock player feed for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::Address;

use super::{FeedError, PlayerFeed, PlayerRecord, PlayerStats};

#[derive(Debug, Default)]
pub struct MockPlayerFeed {
    pages: Mutex<Vec<Vec<PlayerRecord>>>,
    stats: Mutex<HashMap<Address, PlayerStats>>,
}

impl MockPlayerFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, records: Vec<PlayerRecord>) -> Self {
        self.pages.lock().unwrap().push(records);
        self
    }

    pub fn with_stats(self, stats: PlayerStats) -> Self {
        self.stats
            .lock()
            .unwrap()
            .insert(stats.wallet.clone(), stats);
        self
    }

    pub fn set_pages(&self, pages: Vec<Vec<PlayerRecord>>) {
        *self.pages.lock().unwrap() = pages;
    }
}

#[async_trait]
impl PlayerFeed for MockPlayerFeed {
    async fn new_players(&self, page: u32) -> Result<Vec<PlayerRecord>, FeedError> {
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(page as usize)
            .cloned()
            .unwrap_or_default())
    }

    async fn player_stats(&self, wallet: &Address) -> Result<Option<PlayerStats>, FeedError> {
        Ok(self.stats.lock().unwrap().get(wallet).cloned())
    }
}
