//! JSON-RPC chain client implementation.
//!
//! Talks to a node that manages the fleet's accounts, so submission goes
//! through `eth_sendTransaction` and signing never enters this crate.

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::domain::{Address, Asset, Side, TradeEvent};

use super::{ChainClient, ChainError, TxSubmission};

// Keccak selectors of the market contract's view and trade functions.
const SELECTOR_BUY_PRICE: &str = "0x2f1b2b23";
const SELECTOR_SELL_PRICE: &str = "0x451b6a35";
const SELECTOR_SHARES_BALANCE: &str = "0x5b7d6c36";
const SELECTOR_TOKEN_BALANCE: &str = "0x70a08231";
const SELECTOR_BUY: &str = "0x6945b123";
const SELECTOR_SELL: &str = "0xb51d0534";

/// Topic0 of the market contract's Trade event.
const TRADE_EVENT_TOPIC: &str =
    "0x2c76e7a47fd53e2854856ac3f0a5f3ee40d15cfaa82266357ea9779c486ab9c3";

/// JSON-RPC client over HTTP with retry/backoff.
#[derive(Debug, Clone)]
pub struct JsonRpcChainClient {
    client: Client,
    url: String,
    market_contract: Address,
    token_contract: Address,
}

impl JsonRpcChainClient {
    pub fn new(url: String, market_contract: Address, token_contract: Address) -> Self {
        Self {
            client: Client::new(),
            url,
            market_contract,
            token_contract,
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        retry(backoff, || async {
            let response = self
                .client
                .post(&self.url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(ChainError::Network(e.to_string())))?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(ChainError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(ChainError::Http {
                    status: status.as_u16(),
                    message: "server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(ChainError::Http {
                    status: status.as_u16(),
                    message: "client error".to_string(),
                }));
            }

            let body: Value = response
                .json()
                .await
                .map_err(|e| backoff::Error::permanent(ChainError::Parse(e.to_string())))?;

            if let Some(err) = body.get("error") {
                return Err(backoff::Error::permanent(ChainError::Rpc(err.to_string())));
            }
            body.get("result")
                .cloned()
                .ok_or_else(|| backoff::Error::permanent(ChainError::Parse("missing result".into())))
        })
        .await
    }

    async fn rpc_u64(&self, method: &str, params: Value) -> Result<u64, ChainError> {
        let result = self.rpc(method, params).await?;
        parse_hex_u64(&result)
    }

    async fn rpc_u128(&self, method: &str, params: Value) -> Result<u128, ChainError> {
        let result = self.rpc(method, params).await?;
        parse_hex_u128(&result)
    }

    async fn eth_call(&self, to: &str, data: String) -> Result<Value, ChainError> {
        self.rpc(
            "eth_call",
            json!([{ "to": to, "data": data }, "latest"]),
        )
        .await
    }

    async fn send_transaction(&self, tx: Value, holder: &Address) -> Result<TxSubmission, ChainError> {
        // Nonce is captured before submission so the pending-order record can
        // later be reconciled by nonce advance alone.
        let nonce = self.transaction_count(holder).await?;
        let result = self.rpc("eth_sendTransaction", json!([tx])).await?;
        let tx_hash = result
            .as_str()
            .ok_or_else(|| ChainError::Parse("expected tx hash string".into()))?
            .to_string();
        debug!(holder = %holder, %tx_hash, nonce, "transaction accepted by node");
        Ok(TxSubmission { tx_hash, nonce })
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.rpc_u64("eth_blockNumber", json!([])).await
    }

    async fn trade_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TradeEvent>, ChainError> {
        debug!(from_block, to_block, "fetching trade events");
        let result = self
            .rpc(
                "eth_getLogs",
                json!([{
                    "address": self.market_contract.as_str(),
                    "topics": [TRADE_EVENT_TOPIC],
                    "fromBlock": to_hex(from_block as u128),
                    "toBlock": to_hex(to_block as u128),
                }]),
            )
            .await?;

        let logs = result
            .as_array()
            .ok_or_else(|| ChainError::Parse("expected log array".into()))?;
        parse_trade_logs(logs)
    }

    async fn gas_balance(&self, address: &Address) -> Result<u128, ChainError> {
        self.rpc_u128("eth_getBalance", json!([address.as_str(), "latest"]))
            .await
    }

    async fn token_balance(&self, address: &Address) -> Result<u128, ChainError> {
        let data = format!("{}{}", SELECTOR_TOKEN_BALANCE, abi_address(address.as_str())?);
        let result = self.eth_call(self.token_contract.as_str(), data).await?;
        parse_hex_u128(&result)
    }

    async fn shares_balance(&self, asset: &Asset, address: &Address) -> Result<u64, ChainError> {
        let data = format!(
            "{}{}{}",
            SELECTOR_SHARES_BALANCE,
            abi_address(asset.as_str())?,
            abi_address(address.as_str())?
        );
        let result = self.eth_call(self.market_contract.as_str(), data).await?;
        Ok(parse_hex_u128(&result)? as u64)
    }

    async fn transaction_count(&self, address: &Address) -> Result<u64, ChainError> {
        self.rpc_u64(
            "eth_getTransactionCount",
            json!([address.as_str(), "latest"]),
        )
        .await
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.rpc_u128("eth_gasPrice", json!([])).await
    }

    async fn buy_price(&self, asset: &Asset, quantity: u64) -> Result<u128, ChainError> {
        let data = format!(
            "{}{}{}",
            SELECTOR_BUY_PRICE,
            abi_address(asset.as_str())?,
            abi_u64(quantity)
        );
        let result = self.eth_call(self.market_contract.as_str(), data).await?;
        parse_hex_u128(&result)
    }

    async fn sell_price(&self, asset: &Asset, quantity: u64) -> Result<u128, ChainError> {
        let data = format!(
            "{}{}{}",
            SELECTOR_SELL_PRICE,
            abi_address(asset.as_str())?,
            abi_u64(quantity)
        );
        let result = self.eth_call(self.market_contract.as_str(), data).await?;
        parse_hex_u128(&result)
    }

    async fn submit_buy(
        &self,
        holder: &Address,
        asset: &Asset,
        quantity: u64,
        max_cost_wei: u128,
    ) -> Result<TxSubmission, ChainError> {
        let data = format!("{}{}{}", SELECTOR_BUY, abi_address(asset.as_str())?, abi_u64(quantity));
        let tx = json!({
            "from": holder.as_str(),
            "to": self.market_contract.as_str(),
            "value": to_hex(max_cost_wei),
            "data": data,
        });
        self.send_transaction(tx, holder).await
    }

    async fn submit_sell(
        &self,
        holder: &Address,
        asset: &Asset,
        quantity: u64,
    ) -> Result<TxSubmission, ChainError> {
        let data = format!("{}{}{}", SELECTOR_SELL, abi_address(asset.as_str())?, abi_u64(quantity));
        let tx = json!({
            "from": holder.as_str(),
            "to": self.market_contract.as_str(),
            "data": data,
        });
        self.send_transaction(tx, holder).await
    }
}

fn to_hex(value: u128) -> String {
    format!("0x{:x}", value)
}

fn parse_hex_u128(value: &Value) -> Result<u128, ChainError> {
    let s = value
        .as_str()
        .ok_or_else(|| ChainError::Parse(format!("expected hex string, got {}", value)))?;
    let trimmed = s.trim_start_matches("0x");
    u128::from_str_radix(trimmed, 16)
        .map_err(|e| ChainError::Parse(format!("bad hex quantity {}: {}", s, e)))
}

fn parse_hex_u64(value: &Value) -> Result<u64, ChainError> {
    Ok(parse_hex_u128(value)? as u64)
}

/// Left-pad an address to a 32-byte ABI word (without 0x prefix).
fn abi_address(addr: &str) -> Result<String, ChainError> {
    let stripped = addr.trim_start_matches("0x");
    if stripped.len() > 64 || hex::decode(stripped).is_err() {
        return Err(ChainError::Parse(format!("bad address {}", addr)));
    }
    Ok(format!("{:0>64}", stripped))
}

fn abi_u64(value: u64) -> String {
    format!("{:064x}", value)
}

/// Decode a batch of Trade logs. Any undecodable log fails the whole fetch:
/// the indexer resumes past the batch's blocks, so an event dropped here
/// would be lost from the ledger permanently.
fn parse_trade_logs(logs: &[Value]) -> Result<Vec<TradeEvent>, ChainError> {
    logs.iter().map(parse_trade_log).collect()
}

/// Decode one Trade log: indexed (trader, asset), data (isBuy, quantity, wei, supply).
fn parse_trade_log(log: &Value) -> Result<TradeEvent, ChainError> {
    let topics = log
        .get("topics")
        .and_then(|t| t.as_array())
        .ok_or_else(|| ChainError::Parse("missing topics".into()))?;
    if topics.len() < 3 {
        return Err(ChainError::Parse("expected 3 topics".into()));
    }

    let trader = Address::new(word_to_address(&topics[1])?);
    let asset = Asset::new(word_to_address(&topics[2])?);

    let data = log
        .get("data")
        .and_then(|d| d.as_str())
        .ok_or_else(|| ChainError::Parse("missing data".into()))?;
    let words = data_words(data)?;
    if words.len() < 4 {
        return Err(ChainError::Parse(format!("expected 4 data words, got {}", words.len())));
    }

    let side = if words[0] == 0 { Side::Sell } else { Side::Buy };

    Ok(TradeEvent {
        block_number: parse_hex_u64(
            log.get("blockNumber")
                .ok_or_else(|| ChainError::Parse("missing blockNumber".into()))?,
        )?,
        tx_hash: log
            .get("transactionHash")
            .and_then(|h| h.as_str())
            .ok_or_else(|| ChainError::Parse("missing transactionHash".into()))?
            .to_string(),
        trader,
        asset,
        side,
        quantity: words[1] as u64,
        wei: words[2],
        supply: words[3] as u64,
    })
}

fn word_to_address(topic: &Value) -> Result<String, ChainError> {
    let s = topic
        .as_str()
        .ok_or_else(|| ChainError::Parse("topic is not a string".into()))?;
    let stripped = s.trim_start_matches("0x");
    if stripped.len() != 64 {
        return Err(ChainError::Parse(format!("bad topic word {}", s)));
    }
    Ok(format!("0x{}", &stripped[24..]))
}

fn data_words(data: &str) -> Result<Vec<u128>, ChainError> {
    let stripped = data.trim_start_matches("0x");
    if stripped.len() % 64 != 0 {
        return Err(ChainError::Parse("log data is not word aligned".into()));
    }
    stripped
        .as_bytes()
        .chunks(64)
        .map(|chunk| {
            let word = std::str::from_utf8(chunk)
                .map_err(|_| ChainError::Parse("non-utf8 log data".into()))?;
            // Values fit in the low 16 bytes for this market.
            u128::from_str_radix(&word[32..], 16)
                .map_err(|e| ChainError::Parse(format!("bad data word: {}", e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log(block: u64) -> Value {
        json!({
            "blockNumber": to_hex(block as u128),
            "transactionHash": "0xdeadbeef",
            "topics": [
                TRADE_EVENT_TOPIC,
                format!("0x{:0>64}", "1111111111111111111111111111111111111111"),
                format!("0x{:0>64}", "2222222222222222222222222222222222222222"),
            ],
            "data": format!(
                "0x{:064x}{:064x}{:064x}{:064x}",
                1u64, 12u64, 1200u64, 40u64
            ),
        })
    }

    #[test]
    fn test_parse_trade_log() {
        let event = parse_trade_log(&sample_log(100)).unwrap();
        assert_eq!(event.block_number, 100);
        assert_eq!(event.side, Side::Buy);
        assert_eq!(event.quantity, 12);
        assert_eq!(event.wei, 1200);
        assert_eq!(event.supply, 40);
        assert_eq!(
            event.trader.as_str(),
            "0x1111111111111111111111111111111111111111"
        );
    }

    #[test]
    fn test_undecodable_log_fails_whole_batch() {
        // One word-misaligned log next to a valid one: the batch must error
        // out rather than return the valid event alone.
        let mut bad = sample_log(100);
        bad["data"] = json!("0xabc");
        let good = sample_log(101);

        let err = parse_trade_logs(&[bad, good.clone()]).unwrap_err();
        assert!(matches!(err, ChainError::Parse(_)));

        let events = parse_trade_logs(&[good]).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].block_number, 101);
    }

    #[test]
    fn test_abi_address_pads() {
        let word = abi_address("0xab").unwrap();
        assert_eq!(word.len(), 64);
        assert!(word.ends_with("ab"));
        assert!(abi_address("0xzz").is_err());
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex_u128(&json!("0x10")).unwrap(), 16);
        assert!(parse_hex_u128(&json!(16)).is_err());
    }
}
