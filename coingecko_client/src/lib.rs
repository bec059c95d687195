//! CoinGecko API client with per-run caching.
//!
//! Implements [`swap_core::PriceOracle`]: contract-address and symbol
//! resolution to CoinGecko coin ids, historical prices from a bounded
//! market-chart window, and current spot quotes. Caches live for the
//! process lifetime only; nothing is persisted across runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config_manager::CoinGeckoConfig;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use swap_core::{Chain, OracleError, PriceOracle};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum CoinGeckoError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("CoinGecko API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("CoinGecko could not resolve coin id for {0}")]
    UnresolvedContract(String),
    #[error("CoinGecko has no price data for {0}")]
    NoPriceData(String),
    #[error("Invalid price value in CoinGecko response: {0}")]
    InvalidPrice(String),
}

pub type Result<T> = std::result::Result<T, CoinGeckoError>;

#[derive(Debug, Deserialize)]
struct ContractResponse {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MarketChartResponse {
    /// `[unix_ms, price]` pairs.
    #[serde(default)]
    prices: Vec<(f64, f64)>,
}

pub struct CoinGeckoClient {
    config: CoinGeckoConfig,
    http_client: Client,
    /// Historical lookups keyed by `(coin_id, unix_ts)`.
    price_cache: Mutex<HashMap<(String, i64), Decimal>>,
    /// Contract resolution keyed by `(platform, lowercased contract)`.
    contract_cache: Mutex<HashMap<(String, String), String>>,
}

impl CoinGeckoClient {
    pub fn new(config: CoinGeckoConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            config,
            http_client,
            price_cache: Mutex::new(HashMap::new()),
            contract_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &CoinGeckoConfig {
        &self.config
    }

    async fn request_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.config.api_base_url, path);
        let mut last_error: Option<CoinGeckoError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(
                    self.config.rate_limit_delay_ms * attempt as u64,
                ))
                .await;
            }

            let mut builder = self
                .http_client
                .get(&url)
                .header("accept", "application/json")
                .query(params);
            if !self.config.api_key.is_empty() {
                builder = builder.header("x-cg-pro-api-key", &self.config.api_key);
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(CoinGeckoError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 {
                warn!("CoinGecko rate limited on {} (attempt {})", path, attempt + 1);
                last_error = Some(CoinGeckoError::Api {
                    status: 429,
                    body: "rate limited".to_string(),
                });
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CoinGeckoError::Api {
                    status: status.as_u16(),
                    body: body.chars().take(300).collect(),
                });
            }

            return Ok(response.json::<T>().await?);
        }

        Err(last_error.unwrap_or(CoinGeckoError::NoPriceData(path.to_string())))
    }

    /// Resolve a coin id from an on-chain contract address.
    pub async fn coin_id_by_contract(&self, platform: &str, contract: &str) -> Result<String> {
        let key = (platform.to_string(), contract.to_lowercase());
        if let Some(id) = self.contract_cache.lock().await.get(&key) {
            return Ok(id.clone());
        }

        let data: ContractResponse = self
            .request_json(&format!("/coins/{}/contract/{}", platform, contract), &[])
            .await?;
        let coin_id = data
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CoinGeckoError::UnresolvedContract(format!("{}:{}", platform, contract)))?;

        debug!("Resolved {}:{} -> {}", platform, contract, coin_id);
        self.contract_cache.lock().await.insert(key, coin_id.clone());
        Ok(coin_id)
    }

    /// USD price for a coin nearest to the given timestamp, taken from a
    /// bounded market-chart window around it.
    pub async fn price_at_timestamp(
        &self,
        coin_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Decimal> {
        let unix_ts = timestamp.timestamp();
        let cache_key = (coin_id.to_string(), unix_ts);
        if let Some(price) = self.price_cache.lock().await.get(&cache_key) {
            return Ok(*price);
        }

        let window = self.config.lookup_window_seconds as i64;
        let params = [
            ("vs_currency", "usd".to_string()),
            ("from", (unix_ts - window).to_string()),
            ("to", (unix_ts + window).to_string()),
        ];
        let data: MarketChartResponse = self
            .request_json(&format!("/coins/{}/market_chart/range", coin_id), &params)
            .await?;

        let raw = closest_sample(&data.prices, unix_ts)
            .ok_or_else(|| CoinGeckoError::NoPriceData(format!("{} at {}", coin_id, unix_ts)))?;
        let price = Decimal::try_from(raw)
            .map_err(|_| CoinGeckoError::InvalidPrice(raw.to_string()))?;

        self.price_cache.lock().await.insert(cache_key, price);
        Ok(price)
    }

    /// Current USD spot quote for a coin.
    pub async fn current_price_usd(&self, coin_id: &str) -> Result<Decimal> {
        let params = [
            ("ids", coin_id.to_string()),
            ("vs_currencies", "usd".to_string()),
        ];
        let data: HashMap<String, HashMap<String, f64>> =
            self.request_json("/simple/price", &params).await?;

        let raw = data
            .get(coin_id)
            .and_then(|quotes| quotes.get("usd"))
            .copied()
            .ok_or_else(|| CoinGeckoError::NoPriceData(coin_id.to_string()))?;
        Decimal::try_from(raw).map_err(|_| CoinGeckoError::InvalidPrice(raw.to_string()))
    }
}

/// Pick the `[unix_ms, price]` sample closest to the target second.
fn closest_sample(prices: &[(f64, f64)], unix_ts: i64) -> Option<f64> {
    prices
        .iter()
        .min_by_key(|(ms, _)| ((*ms / 1000.0) as i64 - unix_ts).abs())
        .map(|(_, price)| *price)
}

#[async_trait]
impl PriceOracle for CoinGeckoClient {
    async fn resolve_asset_id(
        &self,
        chain: Chain,
        symbol: &str,
        contract: Option<&str>,
    ) -> std::result::Result<String, OracleError> {
        if let Some(contract) = contract {
            let platform = self
                .config
                .platforms
                .get(chain.as_str())
                .ok_or_else(|| {
                    OracleError::UnresolvedAsset(format!(
                        "no CoinGecko platform mapping for chain {}",
                        chain
                    ))
                })?
                .clone();
            return self
                .coin_id_by_contract(&platform, contract)
                .await
                .map_err(|e| match e {
                    CoinGeckoError::UnresolvedContract(detail) => {
                        OracleError::UnresolvedAsset(detail)
                    }
                    other => OracleError::Upstream(other.to_string()),
                });
        }

        self.config
            .symbol_to_id
            .get(&symbol.to_uppercase())
            .cloned()
            .ok_or_else(|| {
                OracleError::UnresolvedAsset(format!(
                    "asset {}",
                    if symbol.is_empty() { "unknown" } else { symbol }
                ))
            })
    }

    async fn price_at(
        &self,
        asset_id: &str,
        at: DateTime<Utc>,
    ) -> std::result::Result<Decimal, OracleError> {
        self.price_at_timestamp(asset_id, at)
            .await
            .map_err(|e| match e {
                CoinGeckoError::NoPriceData(detail) => OracleError::PriceUnavailable(detail),
                other => OracleError::Upstream(other.to_string()),
            })
    }

    async fn current_price(&self, asset_id: &str) -> std::result::Result<Decimal, OracleError> {
        self.current_price_usd(asset_id)
            .await
            .map_err(|e| match e {
                CoinGeckoError::NoPriceData(detail) => OracleError::PriceUnavailable(detail),
                other => OracleError::Upstream(other.to_string()),
            })
    }
}
