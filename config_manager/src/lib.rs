use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration loading error: {0}")]
    ConfigLoad(#[from] ConfigError),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Alchemy transfers API configuration
    pub alchemy: AlchemyConfig,

    /// CoinGecko price oracle configuration
    pub coingecko: CoinGeckoConfig,

    /// SQLite database configuration
    pub database: DatabaseConfig,

    /// Spam filtering applied before transfers are stored
    pub spam: SpamFilterConfig,

    /// Chains fetched by the `fetch` command
    pub chains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlchemyConfig {
    /// Alchemy API key
    pub api_key: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Transfers per page (the API takes this as a hex string)
    pub max_count: u32,

    /// Starting block for transfer queries
    pub from_block: String,

    /// Page ordering ("asc" or "desc")
    pub order: String,

    /// Delay before retrying a rate-limited request, in milliseconds
    pub rate_limit_delay_ms: u64,
}

impl AlchemyConfig {
    /// Mainnet JSON-RPC endpoint for a chain, or None for unknown chains.
    pub fn rpc_url(&self, chain: &str) -> Option<String> {
        let subdomain = match chain {
            "ethereum" => "eth-mainnet",
            "base" => "base-mainnet",
            "arbitrum" => "arb-mainnet",
            _ => return None,
        };
        Some(format!(
            "https://{}.g.alchemy.com/v2/{}",
            subdomain, self.api_key
        ))
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(ConfigurationError::InvalidValue(
                "Alchemy API key is required".to_string(),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigurationError::InvalidValue(
                "Request timeout must be greater than 0".to_string(),
            ));
        }
        if self.max_count == 0 {
            return Err(ConfigurationError::InvalidValue(
                "max_count must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinGeckoConfig {
    /// CoinGecko API key (pro header); empty means unauthenticated
    pub api_key: String,

    /// CoinGecko API base URL
    pub api_base_url: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Half-width of the historical price lookup window, in seconds
    pub lookup_window_seconds: u64,

    /// Max retry attempts for failed requests
    pub max_retries: u32,

    /// Delay between retries in milliseconds
    pub rate_limit_delay_ms: u64,

    /// CoinGecko id of the asset all swaps are valued in
    pub reference_asset_id: String,

    /// Chain name -> CoinGecko platform id, for contract lookups
    pub platforms: HashMap<String, String>,

    /// Built-in symbol -> CoinGecko id table for assets without a
    /// contract address (native coins and a few majors)
    pub symbol_to_id: HashMap<String, String>,
}

impl CoinGeckoConfig {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_seconds == 0 {
            return Err(ConfigurationError::InvalidValue(
                "Request timeout must be greater than 0".to_string(),
            ));
        }
        if self.reference_asset_id.is_empty() {
            return Err(ConfigurationError::InvalidValue(
                "reference_asset_id is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamFilterConfig {
    /// Max length for an asset symbol to pass the allowlist
    pub asset_max_len: usize,

    /// TLDs that make an asset name look like a URL/domain
    pub spam_tlds: Vec<String>,

    /// Promo keywords that mark an asset name as spam
    pub spam_keywords: Vec<String>,

    /// Drop zero-value transfers before insert
    pub exclude_zero_value: bool,

    /// Optional per-chain dust thresholds for native transfers, in wei.
    /// A missing entry disables the threshold for that chain.
    pub dust_wei_thresholds: HashMap<String, u64>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            alchemy: AlchemyConfig {
                api_key: String::new(), // Must be set in config file or environment
                request_timeout_seconds: 30,
                max_count: 200,
                from_block: "0x0".to_string(),
                order: "asc".to_string(),
                rate_limit_delay_ms: 1500,
            },
            coingecko: CoinGeckoConfig::default(),
            database: DatabaseConfig {
                path: "transactions.sqlite3".to_string(),
            },
            spam: SpamFilterConfig::default(),
            chains: vec![
                "ethereum".to_string(),
                "base".to_string(),
                "arbitrum".to_string(),
            ],
        }
    }
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        let platforms = HashMap::from([
            ("ethereum".to_string(), "ethereum".to_string()),
            ("base".to_string(), "base".to_string()),
            ("arbitrum".to_string(), "arbitrum-one".to_string()),
        ]);
        let symbol_to_id = HashMap::from([
            ("ETH".to_string(), "ethereum".to_string()),
            ("WETH".to_string(), "weth".to_string()),
            ("USDC".to_string(), "usd-coin".to_string()),
            ("USDT".to_string(), "tether".to_string()),
            ("DAI".to_string(), "dai".to_string()),
            ("WBTC".to_string(), "wrapped-bitcoin".to_string()),
            ("BTC".to_string(), "bitcoin".to_string()),
        ]);
        Self {
            api_key: String::new(),
            api_base_url: "https://api.coingecko.com/api/v3".to_string(),
            request_timeout_seconds: 30,
            lookup_window_seconds: 900,
            max_retries: 3,
            rate_limit_delay_ms: 1000,
            reference_asset_id: "bitcoin".to_string(),
            platforms,
            symbol_to_id,
        }
    }
}

impl Default for SpamFilterConfig {
    fn default() -> Self {
        let spam_tlds = [
            "com", "xyz", "top", "site", "info", "io", "co", "org", "net", "app", "club", "vip",
            "quest", "art", "shop", "trade", "fun", "pro", "lol", "best", "guru", "work", "ltd",
            "loan", "click", "gift", "today", "party", "online", "cloud", "web", "in", "me",
            "biz", "store", "live", "space", "social", "link", "zip", "mov", "page",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let spam_keywords = [
            "http", "https", "www.", "t.me", "telegram", "discord", "twitter", "x.com",
            "airdrop", "claim", "free", "bonus", "gift",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        Self {
            asset_max_len: 16,
            spam_tlds,
            spam_keywords,
            exclude_zero_value: true,
            dust_wei_thresholds: HashMap::new(),
        }
    }
}

impl SystemConfig {
    /// Load configuration from `config.toml` and environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from_path("config.toml")
    }

    /// Load configuration from a specific file path. Precedence: defaults,
    /// then the file if it exists, then `SWAP__`-prefixed environment
    /// variables (e.g. `SWAP__ALCHEMY__API_KEY`).
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config_builder =
            Config::builder().add_source(Config::try_from(&SystemConfig::default())?);

        if config_path.as_ref().exists() {
            info!(
                "Loading configuration from: {}",
                config_path.as_ref().display()
            );
            config_builder = config_builder.add_source(File::from(config_path.as_ref()));
        } else {
            debug!("Config file not found, using defaults and environment variables");
        }

        config_builder = config_builder.add_source(
            Environment::with_prefix("SWAP")
                .try_parsing(true)
                .separator("__")
                .list_separator(","),
        );

        let config = config_builder.build()?;
        let system_config: SystemConfig = config.try_deserialize()?;
        Ok(system_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_supported_chains() {
        let config = SystemConfig::default();
        for chain in &config.chains {
            assert!(
                config.alchemy.rpc_url(chain).is_some(),
                "no RPC mapping for {}",
                chain
            );
            assert!(
                config.coingecko.platforms.contains_key(chain),
                "no CoinGecko platform for {}",
                chain
            );
        }
    }

    #[test]
    fn rpc_url_embeds_the_api_key() {
        let mut config = SystemConfig::default();
        config.alchemy.api_key = "test-key".to_string();
        assert_eq!(
            config.alchemy.rpc_url("ethereum").unwrap(),
            "https://eth-mainnet.g.alchemy.com/v2/test-key"
        );
        assert!(config.alchemy.rpc_url("polygon").is_none());
    }

    #[test]
    fn validation_rejects_missing_alchemy_key() {
        let config = SystemConfig::default();
        assert!(config.alchemy.validate().is_err());
        assert!(config.coingecko.validate().is_ok());
    }

    #[test]
    fn symbol_table_contains_the_majors() {
        let config = CoinGeckoConfig::default();
        assert_eq!(config.symbol_to_id.get("ETH").unwrap(), "ethereum");
        assert_eq!(config.symbol_to_id.get("USDC").unwrap(), "usd-coin");
        assert_eq!(config.reference_asset_id, "bitcoin");
    }
}
