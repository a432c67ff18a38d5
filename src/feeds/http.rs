//! HTTP implementation of the player feed.

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::domain::Address;

use super::{FeedError, PlayerFeed, PlayerRecord, PlayerStats};

#[derive(Debug, Clone)]
pub struct HttpPlayerFeed {
    client: Client,
    base_url: String,
}

impl HttpPlayerFeed {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    async fn get_json(&self, url: String) -> Result<Option<serde_json::Value>, FeedError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(20)),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(FeedError::Network(e.to_string())))?;

            let status = response.status();
            if status == 404 {
                return Ok(None);
            }
            if status == 429 {
                return Err(backoff::Error::transient(FeedError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(FeedError::Http {
                    status: status.as_u16(),
                    message: "server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(FeedError::Http {
                    status: status.as_u16(),
                    message: "client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map(Some)
                .map_err(|e| backoff::Error::permanent(FeedError::Parse(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl PlayerFeed for HttpPlayerFeed {
    async fn new_players(&self, page: u32) -> Result<Vec<PlayerRecord>, FeedError> {
        debug!(page, "fetching new player page");
        let url = format!("{}/players?page={}", self.base_url, page);
        let Some(body) = self.get_json(url).await? else {
            return Ok(Vec::new());
        };
        serde_json::from_value(body).map_err(|e| FeedError::Parse(e.to_string()))
    }

    async fn player_stats(&self, wallet: &Address) -> Result<Option<PlayerStats>, FeedError> {
        debug!(wallet = %wallet, "fetching player stats");
        let url = format!("{}/players/{}", self.base_url, wallet);
        match self.get_json(url).await? {
            None => Ok(None),
            Some(body) => serde_json::from_value(body)
                .map(Some)
                .map_err(|e| FeedError::Parse(e.to_string())),
        }
    }
}
