//! New-user watcher: turns unseen players into buy-rule evaluations.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::{Asset, TimeMs};
use crate::exec::PeriodicTask;
use crate::rules::{EvalContext, RuleEngine, RuleInvoker};

use super::PlayerFeed;

/// Polls the paged player feed and enqueues a buy evaluation for every
/// player created since the last seen creation time.
pub struct NewUserWatcher {
    feed: Arc<dyn PlayerFeed>,
    engine: Arc<RuleEngine>,
    invoker: RuleInvoker,
    last_seen_ms: TimeMs,
    max_pages: u32,
}

impl NewUserWatcher {
    pub fn new(feed: Arc<dyn PlayerFeed>, engine: Arc<RuleEngine>, invoker: RuleInvoker) -> Self {
        Self {
            feed,
            engine,
            invoker,
            // Start from "now": players existing before boot are not new.
            last_seen_ms: TimeMs::now(),
            max_pages: 10,
        }
    }

    /// One poll cycle. Feed failures skip the cycle; the next interval retries.
    pub async fn run_once(&mut self) {
        let mut newest_seen = self.last_seen_ms;
        let mut fresh = Vec::new();

        'pages: for page in 0..self.max_pages {
            let records = match self.feed.new_players(page).await {
                Ok(records) => records,
                Err(e) => {
                    warn!("new-player feed fetch failed, skipping cycle: {}", e);
                    return;
                }
            };
            if records.is_empty() {
                break;
            }
            for record in records {
                if record.created_ms <= self.last_seen_ms {
                    // Listing is newest-first; everything further is old.
                    break 'pages;
                }
                newest_seen = newest_seen.max(record.created_ms);
                fresh.push(record);
            }
        }

        self.last_seen_ms = newest_seen;
        if fresh.is_empty() {
            return;
        }
        info!(count = fresh.len(), "enqueueing buy evaluations for new players");
        for record in fresh {
            let ctx = EvalContext::for_new_user(Asset::new(record.wallet.as_str()));
            self.invoker.enqueue_buy(self.engine.clone(), ctx);
        }
    }
}

#[async_trait]
impl PeriodicTask for NewUserWatcher {
    fn name(&self) -> &'static str {
        "new-user-watcher"
    }

    async fn run_cycle(&mut self) {
        self.run_once().await;
    }
}
