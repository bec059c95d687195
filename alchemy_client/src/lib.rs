//! Alchemy Transfers API client.
//!
//! Fetches native ("external") and ERC-20 transfers for a wallet in both
//! directions, pages through `pageKey` cursors, and spam-filters the
//! merged result before it reaches the store.

pub mod client;
pub mod spam;
pub mod types;

pub use client::{validate_address, AlchemyClient};
pub use spam::SpamFilter;
pub use types::AssetTransfer;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlchemyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Alchemy API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Alchemy RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid wallet address: {address}")]
    InvalidAddress { address: String },

    #[error("No RPC endpoint configured for chain: {chain}")]
    UnsupportedChain { chain: String },
}

pub type Result<T> = std::result::Result<T, AlchemyError>;
