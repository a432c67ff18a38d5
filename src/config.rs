//! Process configuration, read once from the environment at startup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for every file store (ledger, orders, halt marker).
    pub data_dir: PathBuf,
    pub rpc_url: String,
    pub market_contract: String,
    pub token_contract: String,
    /// First block the market contract could have emitted events in.
    pub deployment_block: u64,
    pub fleet_file: PathBuf,
    pub buy_rules_file: PathBuf,
    pub sell_rules_file: PathBuf,
    /// Off-chain player stats API; the new-user watcher is off without it.
    pub stats_api_url: Option<String>,
    pub webhook_url: Option<String>,
    /// When set, transactions are fabricated locally instead of submitted.
    pub simulation: bool,
    pub index_batch_size: u64,
    pub live_delta_blocks: u64,
    pub indexer_poll: Duration,
    pub gofer_delay: Duration,
    pub sweep_interval: Duration,
    pub feed_interval: Duration,
    pub stale_order_after: Duration,
    pub max_pending_age: Duration,
    pub low_balance_ttl: Duration,
    pub halt_log_every: Duration,
    pub min_gas_wei: u128,
    pub min_token_wei: u128,
    pub gas_limit_buy: u64,
    pub gas_limit_sell: u64,
    pub sweep_include_buys: bool,
    pub recency_max_age: Duration,
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn parse_or<T: std::str::FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), format!("cannot parse `{}`", raw))
        }),
    }
}

fn parse_bool_or(
    env_map: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match env_map.get(key).map(|s| s.as_str()) {
        None => Ok(default),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be true or false, got {}", other),
        )),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let deployment_block = required(&env_map, "DEPLOYMENT_BLOCK")?
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "DEPLOYMENT_BLOCK".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;
        let min_gas_wei = required(&env_map, "MIN_GAS_WEI")?.parse::<u128>().map_err(|_| {
            ConfigError::InvalidValue("MIN_GAS_WEI".to_string(), "must be a valid u128".to_string())
        })?;
        let min_token_wei = required(&env_map, "MIN_TOKEN_WEI")?
            .parse::<u128>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "MIN_TOKEN_WEI".to_string(),
                    "must be a valid u128".to_string(),
                )
            })?;

        Ok(Config {
            data_dir: PathBuf::from(required(&env_map, "DATA_DIR")?),
            rpc_url: required(&env_map, "RPC_URL")?,
            market_contract: required(&env_map, "MARKET_CONTRACT")?,
            token_contract: required(&env_map, "TOKEN_CONTRACT")?,
            deployment_block,
            fleet_file: PathBuf::from(required(&env_map, "FLEET_FILE")?),
            buy_rules_file: PathBuf::from(required(&env_map, "BUY_RULES_FILE")?),
            sell_rules_file: PathBuf::from(required(&env_map, "SELL_RULES_FILE")?),
            stats_api_url: env_map.get("STATS_API_URL").cloned(),
            webhook_url: env_map.get("WEBHOOK_URL").cloned(),
            simulation: parse_bool_or(&env_map, "SIMULATION", true)?,
            index_batch_size: parse_or(&env_map, "INDEX_BATCH_SIZE", 1000u64)?,
            live_delta_blocks: parse_or(&env_map, "LIVE_DELTA_BLOCKS", 3u64)?,
            indexer_poll: Duration::from_secs(parse_or(&env_map, "INDEXER_POLL_SECS", 5u64)?),
            gofer_delay: Duration::from_secs(parse_or(&env_map, "GOFER_DELAY_SECS", 10u64)?),
            sweep_interval: Duration::from_secs(parse_or(&env_map, "SWEEP_INTERVAL_SECS", 300u64)?),
            feed_interval: Duration::from_secs(parse_or(&env_map, "FEED_INTERVAL_SECS", 60u64)?),
            stale_order_after: Duration::from_secs(
                parse_or(&env_map, "STALE_ORDER_MINUTES", 10u64)? * 60,
            ),
            max_pending_age: Duration::from_secs(parse_or(&env_map, "MAX_PENDING_SECS", 180u64)?),
            low_balance_ttl: Duration::from_secs(
                parse_or(&env_map, "LOW_BALANCE_TTL_SECS", 30u64)?,
            ),
            halt_log_every: Duration::from_secs(parse_or(&env_map, "HALT_LOG_SECS", 300u64)?),
            min_gas_wei,
            min_token_wei,
            gas_limit_buy: parse_or(&env_map, "GAS_LIMIT_BUY", 250_000u64)?,
            gas_limit_sell: parse_or(&env_map, "GAS_LIMIT_SELL", 150_000u64)?,
            sweep_include_buys: parse_bool_or(&env_map, "SWEEP_INCLUDE_BUYS", false)?,
            recency_max_age: Duration::from_secs(
                parse_or(&env_map, "RECENCY_MAX_HOURS", 72u64)? * 3600,
            ),
        })
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    pub fn orders_dir(&self) -> PathBuf {
        self.data_dir.join("orders")
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.data_dir.join("pending")
    }

    pub fn recency_dir(&self) -> PathBuf {
        self.data_dir.join("recency")
    }

    pub fn whitelists_dir(&self) -> PathBuf {
        self.data_dir.join("whitelists")
    }

    pub fn halt_path(&self) -> PathBuf {
        self.data_dir.join("HALT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATA_DIR".to_string(), "/tmp/curvebot".to_string());
        map.insert("RPC_URL".to_string(), "http://localhost:8545".to_string());
        map.insert("MARKET_CONTRACT".to_string(), "0xmarket".to_string());
        map.insert("TOKEN_CONTRACT".to_string(), "0xtoken".to_string());
        map.insert("DEPLOYMENT_BLOCK".to_string(), "1000".to_string());
        map.insert("FLEET_FILE".to_string(), "/tmp/fleet.json".to_string());
        map.insert("BUY_RULES_FILE".to_string(), "/tmp/buy.json".to_string());
        map.insert("SELL_RULES_FILE".to_string(), "/tmp/sell.json".to_string());
        map.insert("MIN_GAS_WEI".to_string(), "1000000".to_string());
        map.insert("MIN_TOKEN_WEI".to_string(), "2000000".to_string());
        map
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert!(config.simulation);
        assert_eq!(config.index_batch_size, 1000);
        assert_eq!(config.live_delta_blocks, 3);
        assert_eq!(config.stale_order_after, Duration::from_secs(600));
        assert_eq!(config.gas_limit_buy, 250_000);
        assert_eq!(config.recency_max_age, Duration::from_secs(72 * 3600));
        assert!(config.stats_api_url.is_none());
    }

    #[test]
    fn test_missing_rpc_url() {
        let mut env_map = setup_required_env();
        env_map.remove("RPC_URL");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "RPC_URL"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_deployment_block() {
        let mut env_map = setup_required_env();
        env_map.insert("DEPLOYMENT_BLOCK".to_string(), "not_a_number".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "DEPLOYMENT_BLOCK"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_invalid_simulation_flag() {
        let mut env_map = setup_required_env();
        env_map.insert("SIMULATION".to_string(), "maybe".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "SIMULATION"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_overrides_applied() {
        let mut env_map = setup_required_env();
        env_map.insert("SIMULATION".to_string(), "false".to_string());
        env_map.insert("INDEX_BATCH_SIZE".to_string(), "50".to_string());
        env_map.insert("SWEEP_INCLUDE_BUYS".to_string(), "true".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert!(!config.simulation);
        assert_eq!(config.index_batch_size, 50);
        assert!(config.sweep_include_buys);
    }

    #[test]
    fn test_derived_paths() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.ledger_dir(), PathBuf::from("/tmp/curvebot/ledger"));
        assert_eq!(config.halt_path(), PathBuf::from("/tmp/curvebot/HALT"));
    }
}
