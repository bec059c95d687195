pub mod analyzer;

pub use analyzer::{RunSummary, SwapAnalyzer};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Unable to resolve price-oracle id for asset: {0}")]
    UnresolvedAsset(String),
    #[error("No price sample available: {0}")]
    PriceUnavailable(String),
    #[error("Price oracle upstream error: {0}")]
    Upstream(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Transaction store unavailable: {0}")]
    Unavailable(String),
    #[error("Transaction store query failed: {0}")]
    Query(String),
}

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Wallet address is required")]
    InvalidWallet,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

pub type Result<T> = std::result::Result<T, SwapError>;

/// Chains the tracker fetches transfers from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Base,
    Arbitrum,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Base => "base",
            Chain::Arbitrum => "arbitrum",
        }
    }

    pub fn all() -> [Chain; 3] {
        [Chain::Ethereum, Chain::Base, Chain::Arbitrum]
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ethereum" => Ok(Chain::Ethereum),
            "base" => Ok(Chain::Base),
            "arbitrum" => Ok(Chain::Arbitrum),
            other => Err(format!("unsupported chain: {}", other)),
        }
    }
}

/// Transfer categories kept by the fetch pipeline (NFT and internal
/// transfers are filtered out upstream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferCategory {
    /// Native coin transfer ("external" in the transfers API).
    External,
    /// ERC-20 token transfer.
    Erc20,
}

impl TransferCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferCategory::External => "external",
            TransferCategory::Erc20 => "erc20",
        }
    }
}

impl FromStr for TransferCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "external" => Ok(TransferCategory::External),
            "erc20" => Ok(TransferCategory::Erc20),
            other => Err(format!("unsupported transfer category: {}", other)),
        }
    }
}

/// One observed on-chain transfer, as loaded from the transaction store.
///
/// Uniqueness key is `(chain, tx_hash, unique_id)`; a single transaction
/// hash can carry several legs distinguished by `unique_id` (empty string
/// means "no sub-id"). Direction is derived, not stored: a leg is outgoing
/// for wallet W when `from_address == W`, incoming when `to_address == W`,
/// compared case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Store row identifier, used for targeted enrichment writes.
    pub id: i64,
    pub chain: Chain,
    pub tx_hash: String,
    pub unique_id: String,
    pub block_number: Option<i64>,
    /// ISO-8601 block timestamp as delivered by the transfers API; may be
    /// absent, and absent does not disqualify the row from analysis.
    pub block_timestamp: Option<String>,
    pub from_address: String,
    pub to_address: String,
    /// Asset symbol; may be empty for native transfers.
    pub asset: String,
    /// Normalized amount. `None` means the upstream value could not be
    /// turned into a valid decimal and the leg is excluded from aggregation.
    pub value: Option<Decimal>,
    pub contract_address: Option<String>,
    pub category: TransferCategory,
}

/// A transfer about to be inserted into the store (no row id yet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransfer {
    pub tx_hash: String,
    pub unique_id: String,
    pub block_number: Option<i64>,
    pub block_timestamp: Option<String>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub asset: Option<String>,
    pub value: Option<f64>,
    /// Hex amount from the raw contract payload, kept for provenance.
    pub raw_value_wei: Option<String>,
    pub category: TransferCategory,
    pub contract_address: Option<String>,
    /// Original upstream payload, kept for provenance/debugging.
    pub raw_json: Option<String>,
}

/// Sentinel recorded as the spent asset when a swap spent more than one
/// distinct asset; the per-asset breakdown is not persisted, only the USD
/// total.
pub const MULTI_ASSET: &str = "MULTI";

/// Valuation fields written onto the legs of a detected swap.
///
/// Any subset of the fields may be absent when price lookups failed for the
/// group; detection (is-it-a-swap) is decoupled from valuation. Re-running
/// the analyzer overwrites these fields with freshly computed values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwapEnrichment {
    /// Symbol of the single spent asset, or [`MULTI_ASSET`].
    pub spent_asset: Option<String>,
    /// Aggregated spent amount, only when exactly one asset was spent.
    pub spent_amount: Option<Decimal>,
    /// Total cost basis in USD across all spent components.
    pub spent_usd: Option<Decimal>,
    /// Reference-asset USD price at the transaction's reference time.
    pub ref_price_at_purchase: Option<Decimal>,
    /// `spent_usd / ref_price_at_purchase`.
    pub ref_amount: Option<Decimal>,
    /// Reference-asset USD price at analysis time, shared across the run.
    pub ref_price_current: Option<Decimal>,
    /// `ref_amount * ref_price_current`.
    pub ref_value_usd: Option<Decimal>,
}

/// Resolves asset identifiers and USD prices, current or historical.
///
/// Implementations cache per process lifetime; the analyzer treats every
/// call as potentially failing and degrades per group, never per run.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Map a symbol or token contract to the oracle's canonical asset id.
    /// Contract lookup wins when a contract address is present.
    async fn resolve_asset_id(
        &self,
        chain: Chain,
        symbol: &str,
        contract: Option<&str>,
    ) -> std::result::Result<String, OracleError>;

    /// USD price closest to `at` from a bounded lookup window.
    async fn price_at(
        &self,
        asset_id: &str,
        at: DateTime<Utc>,
    ) -> std::result::Result<Decimal, OracleError>;

    /// Current USD quote.
    async fn current_price(&self, asset_id: &str) -> std::result::Result<Decimal, OracleError>;
}

/// Read/write surface of the transaction store that the analyzer needs.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// All stored transfers ordered ascending by block timestamp. Rows
    /// without a timestamp sort first (the store documents this rule).
    async fn all_ordered_by_timestamp(
        &self,
    ) -> std::result::Result<Vec<TransferRecord>, StoreError>;

    /// Set `is_swap` on exactly the given rows. Idempotent; never unsets.
    async fn mark_swap(&self, ids: &[i64]) -> std::result::Result<(), StoreError>;

    /// Overwrite the enrichment fields of the given rows, also setting
    /// `is_swap`. Idempotent for identical inputs.
    async fn write_enrichment(
        &self,
        ids: &[i64],
        enrichment: &SwapEnrichment,
    ) -> std::result::Result<(), StoreError>;
}
