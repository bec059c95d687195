//! Spam heuristics applied before transfers are stored: zero value,
//! URL/promo-looking asset names, symbols outside a conservative
//! allowlist, and optional native-transfer dust thresholds.

use config_manager::SpamFilterConfig;
use regex::Regex;
use std::collections::HashMap;
use swap_core::Chain;

use crate::types::{parse_hex_u128, AssetTransfer};

pub struct SpamFilter {
    allowed_asset: Regex,
    url_like: Regex,
    keywords: Vec<String>,
    exclude_zero_value: bool,
    dust_wei_thresholds: HashMap<String, u64>,
}

impl SpamFilter {
    pub fn new(config: &SpamFilterConfig) -> Self {
        let allowed_asset = Regex::new(&format!(
            "^[A-Za-z0-9+_.-]{{1,{}}}$",
            config.asset_max_len
        ))
        .expect("allowlist pattern is static");

        let tld_alt = config
            .spam_tlds
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        let url_like = Regex::new(&format!(
            r"(?i)(https?://|www\.)|([a-z0-9-]{{1,63}}\.(?:{})(?:[/?#].*)?)",
            tld_alt
        ))
        .expect("url pattern built from escaped TLDs");

        Self {
            allowed_asset,
            url_like,
            keywords: config
                .spam_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            exclude_zero_value: config.exclude_zero_value,
            dust_wei_thresholds: config.dust_wei_thresholds.clone(),
        }
    }

    pub fn is_spam(&self, transfer: &AssetTransfer, chain: Chain) -> bool {
        let asset = transfer.asset.as_deref().unwrap_or_default();
        if self.exclude_zero_value && value_is_zero(transfer) {
            return true;
        }
        if self.asset_has_url_or_keywords(asset) {
            return true;
        }
        if self.asset_is_weird(asset) {
            return true;
        }
        if self.under_dust(transfer, chain) {
            return true;
        }
        false
    }

    fn asset_has_url_or_keywords(&self, asset: &str) -> bool {
        if asset.is_empty() {
            return false;
        }
        let lowered = asset.to_lowercase();
        if self.keywords.iter().any(|k| lowered.contains(k)) {
            return true;
        }
        self.url_like.is_match(asset)
    }

    fn asset_is_weird(&self, asset: &str) -> bool {
        // Blank is allowed; most chains label native transfers anyway.
        if asset.is_empty() {
            return false;
        }
        !self.allowed_asset.is_match(asset)
    }

    fn under_dust(&self, transfer: &AssetTransfer, chain: Chain) -> bool {
        let Some(&threshold) = self.dust_wei_thresholds.get(chain.as_str()) else {
            return false;
        };
        if transfer.category_str() != "external" {
            return false;
        }
        let Some(raw) = transfer
            .raw_contract
            .as_ref()
            .and_then(|rc| rc.value.as_deref())
        else {
            return false;
        };
        match parse_hex_u128(raw) {
            Some(wei) => wei < threshold as u128,
            None => false,
        }
    }
}

fn value_is_zero(transfer: &AssetTransfer) -> bool {
    transfer.value == Some(0.0)
}
