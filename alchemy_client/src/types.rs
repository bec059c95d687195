use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use swap_core::{NewTransfer, TransferCategory};

/// One transfer as returned by `alchemy_getAssetTransfers`. Unknown fields
/// are retained so the stored raw payload stays faithful to the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetTransfer {
    pub hash: Option<String>,
    pub unique_id: Option<String>,
    /// Hex block number, e.g. `"0x12d4f1c"`.
    pub block_num: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub asset: Option<String>,
    /// Amount already normalized by Alchemy; absent when it could not be
    /// normalized.
    pub value: Option<f64>,
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_contract: Option<RawContract>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TransferMetadata>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContract {
    /// Hex amount in the asset's smallest unit.
    pub value: Option<String>,
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    pub block_timestamp: Option<String>,
}

impl AssetTransfer {
    pub fn category_str(&self) -> String {
        self.category.clone().unwrap_or_default().to_lowercase()
    }

    /// Dedup key within one chain.
    pub fn dedup_key(&self) -> (String, String) {
        (
            self.hash.clone().unwrap_or_default(),
            self.unique_id.clone().unwrap_or_default(),
        )
    }

    /// Shape the payload for insertion. Only called for transfers that
    /// passed the category filter, so an unknown category maps to the
    /// native kind it most resembles rather than failing the batch.
    pub fn to_new_transfer(&self) -> NewTransfer {
        let category = self
            .category_str()
            .parse()
            .unwrap_or(TransferCategory::External);
        NewTransfer {
            tx_hash: self.hash.clone().unwrap_or_default(),
            unique_id: self.unique_id.clone().unwrap_or_default(),
            block_number: self.block_num.as_deref().and_then(parse_hex_i64),
            block_timestamp: self
                .metadata
                .as_ref()
                .and_then(|m| m.block_timestamp.clone()),
            from_address: self.from.clone(),
            to_address: self.to.clone(),
            asset: self.asset.clone(),
            value: self.value,
            raw_value_wei: self.raw_contract.as_ref().and_then(|rc| rc.value.clone()),
            category,
            contract_address: self.raw_contract.as_ref().and_then(|rc| rc.address.clone()),
            raw_json: serde_json::to_string(self).ok(),
        }
    }
}

pub(crate) fn parse_hex_i64(hex: &str) -> Option<i64> {
    i64::from_str_radix(hex.trim_start_matches("0x"), 16).ok()
}

pub(crate) fn parse_hex_u128(hex: &str) -> Option<u128> {
    u128::from_str_radix(hex.trim_start_matches("0x"), 16).ok()
}

// ---- JSON-RPC envelope ----

#[derive(Debug, Serialize)]
pub(crate) struct RpcRequest<'a> {
    pub jsonrpc: &'a str,
    pub id: u32,
    pub method: &'a str,
    pub params: [TransferParams; 1],
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransferParams {
    pub from_block: String,
    pub to_block: String,
    pub category: Vec<String>,
    pub order: String,
    pub with_metadata: bool,
    pub exclude_zero_value: bool,
    /// Hex page size, e.g. `"0xc8"`.
    pub max_count: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcResponse {
    pub result: Option<TransfersResult>,
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransfersResult {
    #[serde(default)]
    pub transfers: Vec<AssetTransfer>,
    pub page_key: Option<String>,
}
