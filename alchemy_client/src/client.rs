use config_manager::{AlchemyConfig, SpamFilterConfig};
use regex::Regex;
use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration;
use swap_core::{Chain, NewTransfer};
use tracing::{debug, info, warn};

use crate::spam::SpamFilter;
use crate::types::{AssetTransfer, RpcRequest, RpcResponse, TransferParams};
use crate::{AlchemyError, Result};

/// Only native and ERC-20 transfers are requested; NFT and internal
/// categories never enter the store.
const FETCH_CATEGORIES: [&str; 2] = ["external", "erc20"];

/// Reject anything that is not a 0x-prefixed 40-hex EVM address before a
/// single request goes out.
pub fn validate_address(address: &str) -> Result<()> {
    let pattern = Regex::new(r"^0x[a-fA-F0-9]{40}$").expect("address pattern is static");
    if pattern.is_match(address) {
        Ok(())
    } else {
        Err(AlchemyError::InvalidAddress {
            address: address.to_string(),
        })
    }
}

pub struct AlchemyClient {
    config: AlchemyConfig,
    spam_filter: SpamFilter,
    http_client: Client,
}

impl AlchemyClient {
    pub fn new(config: AlchemyConfig, spam_config: &SpamFilterConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            config,
            spam_filter: SpamFilter::new(spam_config),
            http_client,
        })
    }

    /// Fetch all transfers touching `address` on one chain, both
    /// directions, deduplicated and spam-filtered, ready for insertion.
    pub async fn fetch_all_for_chain(
        &self,
        address: &str,
        chain: Chain,
    ) -> Result<Vec<NewTransfer>> {
        validate_address(address)?;
        let rpc_url = self
            .config
            .rpc_url(chain.as_str())
            .ok_or_else(|| AlchemyError::UnsupportedChain {
                chain: chain.to_string(),
            })?;

        let incoming = self
            .fetch_direction(&rpc_url, self.params_template(address, Direction::Incoming))
            .await?;
        let outgoing = self
            .fetch_direction(&rpc_url, self.params_template(address, Direction::Outgoing))
            .await?;
        debug!(
            "[{}] fetched {} incoming + {} outgoing transfers",
            chain,
            incoming.len(),
            outgoing.len()
        );

        let merged = dedupe_transfers(incoming.into_iter().chain(outgoing));
        let total = merged.len();
        let kept: Vec<NewTransfer> = merged
            .into_iter()
            .filter(|t| FETCH_CATEGORIES.contains(&t.category_str().as_str()))
            .filter(|t| !self.spam_filter.is_spam(t, chain))
            .map(|t| t.to_new_transfer())
            .collect();

        info!(
            "[{}] {} transfers kept of {} fetched (category + spam filtered)",
            chain,
            kept.len(),
            total
        );
        Ok(kept)
    }

    fn params_template(&self, address: &str, direction: Direction) -> TransferParams {
        let mut params = TransferParams {
            from_block: self.config.from_block.clone(),
            to_block: "latest".to_string(),
            category: FETCH_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            order: self.config.order.clone(),
            with_metadata: true,
            // Tighter than the local zero-value filter: cuts noise upfront.
            exclude_zero_value: true,
            max_count: format!("{:#x}", self.config.max_count),
            to_address: None,
            from_address: None,
            page_key: None,
        };
        match direction {
            Direction::Incoming => params.to_address = Some(address.to_string()),
            Direction::Outgoing => params.from_address = Some(address.to_string()),
        }
        params
    }

    /// Follow `pageKey` cursors until one direction is exhausted.
    async fn fetch_direction(
        &self,
        rpc_url: &str,
        base_params: TransferParams,
    ) -> Result<Vec<AssetTransfer>> {
        let mut out = Vec::new();
        let mut page_key: Option<String> = None;

        loop {
            let mut params = base_params.clone();
            params.page_key = page_key.clone();
            let body = RpcRequest {
                jsonrpc: "2.0",
                id: 1,
                method: "alchemy_getAssetTransfers",
                params: [params],
            };

            let response = self.http_client.post(rpc_url).json(&body).send().await?;
            if response.status().as_u16() == 429 {
                warn!("Alchemy rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(self.config.rate_limit_delay_ms)).await;
                continue;
            }
            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(AlchemyError::Api {
                    status,
                    body: body.chars().take(300).collect(),
                });
            }

            let rpc: RpcResponse = response.json().await?;
            if let Some(error) = rpc.error {
                return Err(AlchemyError::Rpc {
                    code: error.code,
                    message: error.message,
                });
            }
            let Some(result) = rpc.result else {
                break;
            };

            out.extend(result.transfers);
            page_key = result.page_key;
            if page_key.is_none() {
                break;
            }
        }

        Ok(out)
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Incoming,
    Outgoing,
}

fn dedupe_transfers(transfers: impl Iterator<Item = AssetTransfer>) -> Vec<AssetTransfer> {
    let mut seen = HashSet::new();
    let mut deduped = Vec::new();
    for transfer in transfers {
        if seen.insert(transfer.dedup_key()) {
            deduped.push(transfer);
        }
    }
    deduped
}
