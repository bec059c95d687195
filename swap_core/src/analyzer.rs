//! Swap detection and valuation over stored transfers.
//!
//! Transfers are grouped by transaction hash; a group with at least one
//! outgoing and one incoming leg relative to the analyzed wallet is a swap.
//! The outgoing legs are aggregated into a USD cost basis via historical
//! price lookups, converted into a reference-asset amount, and the result
//! is written back onto the group's legs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::{
    OracleError, PriceOracle, Result, SwapEnrichment, SwapError, TransferRecord, TransferStore,
    MULTI_ASSET,
};

/// One (asset, aggregated amount, USD price) tuple derived from the
/// outgoing legs of a swap group that share the same asset identity.
#[derive(Debug, Clone)]
struct SpentComponent {
    asset: String,
    amount: Decimal,
    usd_price: Decimal,
}

impl SpentComponent {
    fn usd_value(&self) -> Decimal {
        self.amount * self.usd_price
    }
}

/// Run-level totals produced by one analysis pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Number of transaction groups that qualified as swaps.
    pub swaps_detected: u64,
    /// Sum of all groups' reference-asset amounts (absent counted as zero).
    pub ref_asset_amount: Decimal,
    /// `ref_asset_amount` valued at the current reference-asset price.
    pub ref_asset_value_usd: Decimal,
    /// Current reference-asset USD price, fetched once per run.
    pub ref_asset_price_current: Decimal,
    /// Per-group valuation or write failures; never fatal to the run.
    pub warnings: Vec<String>,
}

impl RunSummary {
    fn empty() -> Self {
        Self {
            swaps_detected: 0,
            ref_asset_amount: Decimal::ZERO,
            ref_asset_value_usd: Decimal::ZERO,
            ref_asset_price_current: Decimal::ZERO,
            warnings: Vec::new(),
        }
    }
}

/// Detects same-transaction swaps for one wallet and enriches them with
/// USD and reference-asset valuations.
pub struct SwapAnalyzer<O, S> {
    wallet_address: String,
    reference_asset_id: String,
    oracle: O,
    store: S,
}

impl<O: PriceOracle, S: TransferStore> SwapAnalyzer<O, S> {
    /// Fails with [`SwapError::InvalidWallet`] before touching the store
    /// when the wallet address is empty.
    pub fn new(
        wallet_address: &str,
        reference_asset_id: &str,
        oracle: O,
        store: S,
    ) -> Result<Self> {
        if wallet_address.trim().is_empty() {
            return Err(SwapError::InvalidWallet);
        }
        Ok(Self {
            wallet_address: wallet_address.trim().to_lowercase(),
            reference_asset_id: reference_asset_id.to_string(),
            oracle,
            store,
        })
    }

    /// Run one full analysis pass. Per-group valuation and write failures
    /// degrade to warnings; the run only fails on store load, an invalid
    /// wallet, or a missing current reference-asset quote.
    pub async fn analyze(&self) -> Result<RunSummary> {
        let records = self.store.all_ordered_by_timestamp().await?;
        let grouped = group_by_tx_hash(records);
        if grouped.is_empty() {
            info!("No stored transfers to analyze");
            return Ok(RunSummary::empty());
        }

        let ref_price_current = self.oracle.current_price(&self.reference_asset_id).await?;
        debug!(
            "Current {} price: {} USD across {} transaction groups",
            self.reference_asset_id,
            ref_price_current,
            grouped.len()
        );

        let mut swaps_detected = 0u64;
        let mut total_ref_amount = Decimal::ZERO;
        let mut warnings = Vec::new();

        for (tx_hash, rows) in &grouped {
            let outgoing: Vec<&TransferRecord> =
                rows.iter().filter(|r| self.is_outgoing(r)).collect();
            let incoming: Vec<&TransferRecord> =
                rows.iter().filter(|r| self.is_incoming(r)).collect();

            // Not a swap unless the wallet appears on both sides.
            if outgoing.is_empty() || incoming.is_empty() {
                continue;
            }

            // First parseable timestamp in load order, else analysis time.
            // The fallback only shifts which historical price is looked up.
            let reference_time = group_reference_time(rows).unwrap_or_else(Utc::now);

            let components = match self.build_spent_components(&outgoing, reference_time).await {
                Ok(components) => components,
                Err(e) => {
                    warn!("{} valuation skipped: {}", tx_hash, e);
                    warnings.push(format!("{}: {}", tx_hash, e));
                    Vec::new()
                }
            };

            let mut spent_usd = None;
            let mut ref_price_at_purchase = None;
            let mut ref_amount = None;

            if !components.is_empty() {
                let total: Decimal = components.iter().map(SpentComponent::usd_value).sum();
                spent_usd = Some(total);

                match self
                    .oracle
                    .price_at(&self.reference_asset_id, reference_time)
                    .await
                {
                    Ok(price) => {
                        ref_price_at_purchase = Some(price);
                        if price > Decimal::ZERO {
                            ref_amount = Some(total / price);
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} {} price lookup failed: {}",
                            tx_hash, self.reference_asset_id, e
                        );
                        warnings.push(format!("{}: {}", tx_hash, e));
                    }
                }
            }

            let enrichment = SwapEnrichment {
                spent_asset: match components.len() {
                    0 => None,
                    1 => Some(components[0].asset.clone()),
                    _ => Some(MULTI_ASSET.to_string()),
                },
                spent_amount: if components.len() == 1 {
                    Some(components[0].amount)
                } else {
                    None
                },
                spent_usd,
                ref_price_at_purchase,
                ref_amount,
                ref_price_current: ref_amount.map(|_| ref_price_current),
                ref_value_usd: ref_amount.map(|amount| amount * ref_price_current),
            };

            swaps_detected += 1;

            let outgoing_ids: Vec<i64> = outgoing.iter().map(|r| r.id).collect();
            let incoming_ids: Vec<i64> = incoming.iter().map(|r| r.id).collect();
            if let Err(e) = self
                .write_group(&outgoing_ids, &incoming_ids, &enrichment)
                .await
            {
                warn!("{} enrichment write failed: {}", tx_hash, e);
                warnings.push(format!("{}: {}", tx_hash, e));
                continue;
            }

            if let Some(amount) = ref_amount {
                total_ref_amount += amount;
            }
        }

        info!(
            "Swap analysis complete: {} swaps detected, {} {}",
            swaps_detected, total_ref_amount, self.reference_asset_id
        );

        Ok(RunSummary {
            swaps_detected,
            ref_asset_amount: total_ref_amount,
            ref_asset_value_usd: total_ref_amount * ref_price_current,
            ref_asset_price_current: ref_price_current,
            warnings,
        })
    }

    fn is_outgoing(&self, record: &TransferRecord) -> bool {
        record.from_address.to_lowercase() == self.wallet_address
    }

    fn is_incoming(&self, record: &TransferRecord) -> bool {
        record.to_address.to_lowercase() == self.wallet_address
    }

    /// Aggregate the outgoing legs by asset identity and price each key at
    /// the group's reference time. Legs without a positive value are
    /// excluded. Any resolution or price failure abandons the whole
    /// aggregation so partial component sets never corrupt the USD total.
    async fn build_spent_components(
        &self,
        outgoing: &[&TransferRecord],
        reference_time: DateTime<Utc>,
    ) -> std::result::Result<Vec<SpentComponent>, OracleError> {
        let mut amounts: HashMap<(String, Option<String>), Decimal> = HashMap::new();
        let mut chain_by_key = HashMap::new();

        for record in outgoing {
            let Some(amount) = record.value else {
                continue;
            };
            if amount <= Decimal::ZERO {
                continue;
            }
            let key = (record.asset.clone(), record.contract_address.clone());
            *amounts.entry(key.clone()).or_insert(Decimal::ZERO) += amount;
            chain_by_key.insert(key, record.chain);
        }

        let mut components = Vec::with_capacity(amounts.len());
        for ((asset, contract_address), amount) in amounts {
            let chain = chain_by_key[&(asset.clone(), contract_address.clone())];
            let asset_id = self
                .oracle
                .resolve_asset_id(chain, &asset, contract_address.as_deref())
                .await?;
            let usd_price = self.oracle.price_at(&asset_id, reference_time).await?;
            components.push(SpentComponent {
                asset,
                amount,
                usd_price,
            });
        }

        Ok(components)
    }

    /// One batched write per partition: flag the outgoing legs, then
    /// overwrite the incoming legs' enrichment (which also flags them).
    async fn write_group(
        &self,
        outgoing_ids: &[i64],
        incoming_ids: &[i64],
        enrichment: &SwapEnrichment,
    ) -> std::result::Result<(), crate::StoreError> {
        self.store.mark_swap(outgoing_ids).await?;
        self.store.write_enrichment(incoming_ids, enrichment).await
    }
}

fn group_by_tx_hash(records: Vec<TransferRecord>) -> Vec<(String, Vec<TransferRecord>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<TransferRecord>)> = Vec::new();
    for record in records {
        match index.get(&record.tx_hash) {
            Some(&i) => groups[i].1.push(record),
            None => {
                index.insert(record.tx_hash.clone(), groups.len());
                groups.push((record.tx_hash.clone(), vec![record]));
            }
        }
    }
    groups
}

fn group_reference_time(rows: &[TransferRecord]) -> Option<DateTime<Utc>> {
    rows.iter()
        .filter_map(|r| parse_timestamp(r.block_timestamp.as_deref()))
        .next()
}

fn parse_timestamp(ts: Option<&str>) -> Option<DateTime<Utc>> {
    let ts = ts?;
    if ts.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chain, StoreError, TransferCategory};
    use async_trait::async_trait;
    use std::str::FromStr;
    use std::sync::{Arc, Mutex};

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    const WALLET: &str = "0xWallet";
    const USDC_CONTRACT: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

    #[derive(Clone, Default)]
    struct MockOracle {
        current: Option<Decimal>,
        symbols: HashMap<String, String>,
        contracts: HashMap<(Chain, String), String>,
        /// Keyed by (asset id, UTC date) so tests control per-day prices.
        prices: HashMap<(String, String), Decimal>,
    }

    impl MockOracle {
        fn with_defaults() -> Self {
            let mut oracle = Self {
                current: Some(dec("30000")),
                ..Default::default()
            };
            oracle
                .symbols
                .insert("ETH".to_string(), "ethereum".to_string());
            oracle
                .symbols
                .insert("USDC".to_string(), "usd-coin".to_string());
            oracle.contracts.insert(
                (Chain::Ethereum, USDC_CONTRACT.to_string()),
                "usd-coin".to_string(),
            );
            oracle.set_price("usd-coin", "2024-01-01", dec("1"));
            oracle.set_price("bitcoin", "2024-01-01", dec("25000"));
            oracle.set_price("usd-coin", "2024-01-02", dec("1"));
            oracle.set_price("ethereum", "2024-01-02", dec("2000"));
            oracle.set_price("bitcoin", "2024-01-02", dec("26000"));
            oracle
        }

        fn set_price(&mut self, id: &str, date: &str, price: Decimal) {
            self.prices
                .insert((id.to_string(), date.to_string()), price);
        }
    }

    #[async_trait]
    impl PriceOracle for MockOracle {
        async fn resolve_asset_id(
            &self,
            chain: Chain,
            symbol: &str,
            contract: Option<&str>,
        ) -> std::result::Result<String, OracleError> {
            if let Some(contract) = contract {
                return self
                    .contracts
                    .get(&(chain, contract.to_lowercase()))
                    .cloned()
                    .ok_or_else(|| OracleError::UnresolvedAsset(contract.to_string()));
            }
            self.symbols
                .get(&symbol.to_uppercase())
                .cloned()
                .ok_or_else(|| OracleError::UnresolvedAsset(symbol.to_string()))
        }

        async fn price_at(
            &self,
            asset_id: &str,
            at: DateTime<Utc>,
        ) -> std::result::Result<Decimal, OracleError> {
            let key = (asset_id.to_string(), at.format("%Y-%m-%d").to_string());
            self.prices
                .get(&key)
                .copied()
                .ok_or_else(|| OracleError::PriceUnavailable(format!("{:?}", key)))
        }

        async fn current_price(
            &self,
            asset_id: &str,
        ) -> std::result::Result<Decimal, OracleError> {
            self.current
                .ok_or_else(|| OracleError::PriceUnavailable(asset_id.to_string()))
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct RowState {
        is_swap: bool,
        enrichment: SwapEnrichment,
    }

    #[derive(Clone, Default)]
    struct InMemoryStore {
        rows: Arc<Mutex<Vec<(TransferRecord, RowState)>>>,
        fail_writes: bool,
    }

    impl InMemoryStore {
        fn with_records(records: Vec<TransferRecord>) -> Self {
            Self {
                rows: Arc::new(Mutex::new(
                    records
                        .into_iter()
                        .map(|r| (r, RowState::default()))
                        .collect(),
                )),
                fail_writes: false,
            }
        }

        fn state(&self, id: i64) -> RowState {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .find(|(r, _)| r.id == id)
                .map(|(_, s)| s.clone())
                .unwrap()
        }
    }

    #[async_trait]
    impl TransferStore for InMemoryStore {
        async fn all_ordered_by_timestamp(
            &self,
        ) -> std::result::Result<Vec<TransferRecord>, StoreError> {
            // Tests insert rows pre-sorted; mirror the store's stable order.
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .map(|(r, _)| r.clone())
                .collect())
        }

        async fn mark_swap(&self, ids: &[i64]) -> std::result::Result<(), StoreError> {
            if self.fail_writes {
                return Err(StoreError::Query("write rejected".to_string()));
            }
            let mut rows = self.rows.lock().unwrap();
            for (record, state) in rows.iter_mut() {
                if ids.contains(&record.id) {
                    state.is_swap = true;
                }
            }
            Ok(())
        }

        async fn write_enrichment(
            &self,
            ids: &[i64],
            enrichment: &SwapEnrichment,
        ) -> std::result::Result<(), StoreError> {
            if self.fail_writes {
                return Err(StoreError::Query("write rejected".to_string()));
            }
            let mut rows = self.rows.lock().unwrap();
            for (record, state) in rows.iter_mut() {
                if ids.contains(&record.id) {
                    state.is_swap = true;
                    state.enrichment = enrichment.clone();
                }
            }
            Ok(())
        }
    }

    fn transfer(
        id: i64,
        tx_hash: &str,
        unique_id: &str,
        timestamp: Option<&str>,
        from: &str,
        to: &str,
        asset: &str,
        value: Option<&str>,
        contract: Option<&str>,
    ) -> TransferRecord {
        TransferRecord {
            id,
            chain: Chain::Ethereum,
            tx_hash: tx_hash.to_string(),
            unique_id: unique_id.to_string(),
            block_number: Some(1),
            block_timestamp: timestamp.map(str::to_string),
            from_address: from.to_string(),
            to_address: to.to_string(),
            asset: asset.to_string(),
            value: value.map(dec),
            contract_address: contract.map(str::to_string),
            category: if contract.is_some() {
                TransferCategory::Erc20
            } else {
                TransferCategory::External
            },
        }
    }

    /// Two swaps (single-asset and multi-asset spend) plus one plain
    /// incoming transfer that must stay untouched.
    fn scenario_records() -> Vec<TransferRecord> {
        vec![
            transfer(
                1,
                "0xswap1",
                "out-1",
                Some("2024-01-01T00:00:00Z"),
                WALLET,
                "0xDex",
                "USDC",
                Some("1000"),
                Some(USDC_CONTRACT),
            ),
            transfer(
                2,
                "0xswap1",
                "in-1",
                Some("2024-01-01T00:00:00Z"),
                "0xDex",
                WALLET,
                "TOKEN",
                Some("500"),
                Some("0xToken"),
            ),
            transfer(
                3,
                "0xswap2",
                "out-eth",
                Some("2024-01-02T00:00:00Z"),
                WALLET,
                "0xDex2",
                "ETH",
                Some("0.1"),
                None,
            ),
            transfer(
                4,
                "0xswap2",
                "out-usdc",
                Some("2024-01-02T00:00:00Z"),
                WALLET,
                "0xDex2",
                "USDC",
                Some("100"),
                Some(USDC_CONTRACT),
            ),
            transfer(
                5,
                "0xswap2",
                "in-2",
                Some("2024-01-02T00:00:00Z"),
                "0xDex2",
                WALLET,
                "TOKEN2",
                Some("750"),
                Some("0xToken2"),
            ),
            transfer(
                6,
                "0xnoswap",
                "gift",
                Some("2024-01-03T00:00:00Z"),
                "0xFriend",
                WALLET,
                "ETH",
                Some("0.5"),
                None,
            ),
        ]
    }

    fn assert_close(actual: Decimal, expected: Decimal) {
        let tolerance = Decimal::new(1, 8);
        assert!(
            (actual - expected).abs() < tolerance,
            "expected {} within 1e-8 of {}",
            actual,
            expected
        );
    }

    #[tokio::test]
    async fn detects_and_values_swaps_end_to_end() {
        let store = InMemoryStore::with_records(scenario_records());
        let analyzer =
            SwapAnalyzer::new(WALLET, "bitcoin", MockOracle::with_defaults(), store.clone())
                .unwrap();

        let summary = analyzer.analyze().await.unwrap();

        assert_eq!(summary.swaps_detected, 2);
        assert_eq!(summary.ref_asset_price_current, dec("30000"));
        // 1000/25000 + 300/26000
        assert_close(summary.ref_asset_amount, dec("0.0515384615"));
        assert_close(summary.ref_asset_value_usd, dec("1546.1538461"));
        assert!(summary.warnings.is_empty());

        // Single-asset spend: symbol and amount recorded individually.
        let first_in = store.state(2);
        assert!(first_in.is_swap);
        assert_eq!(first_in.enrichment.spent_asset.as_deref(), Some("USDC"));
        assert_eq!(first_in.enrichment.spent_amount, Some(dec("1000")));
        assert_eq!(first_in.enrichment.spent_usd, Some(dec("1000")));
        assert_eq!(
            first_in.enrichment.ref_price_at_purchase,
            Some(dec("25000"))
        );
        assert_close(first_in.enrichment.ref_amount.unwrap(), dec("0.04"));
        assert_eq!(first_in.enrichment.ref_price_current, Some(dec("30000")));
        assert_close(first_in.enrichment.ref_value_usd.unwrap(), dec("1200"));

        // Multi-asset spend: sentinel symbol, no single amount.
        let second_in = store.state(5);
        assert!(second_in.is_swap);
        assert_eq!(second_in.enrichment.spent_asset.as_deref(), Some("MULTI"));
        assert_eq!(second_in.enrichment.spent_amount, None);
        assert_eq!(second_in.enrichment.spent_usd, Some(dec("300")));
        assert_close(second_in.enrichment.ref_amount.unwrap(), dec("0.0115384615"));
        assert_close(
            second_in.enrichment.ref_value_usd.unwrap(),
            dec("346.1538461"),
        );

        // Outgoing legs are flagged without valuation fields.
        let outgoing = store.state(1);
        assert!(outgoing.is_swap);
        assert_eq!(outgoing.enrichment, SwapEnrichment::default());

        // The lone incoming transfer is left completely unmodified.
        let untouched = store.state(6);
        assert!(!untouched.is_swap);
        assert_eq!(untouched.enrichment, SwapEnrichment::default());
    }

    #[tokio::test]
    async fn rejects_empty_wallet_before_any_processing() {
        let store = InMemoryStore::with_records(scenario_records());
        let result = SwapAnalyzer::new("  ", "bitcoin", MockOracle::with_defaults(), store);
        assert!(matches!(result, Err(SwapError::InvalidWallet)));
    }

    #[tokio::test]
    async fn empty_store_yields_zero_summary_without_oracle_calls() {
        let store = InMemoryStore::with_records(Vec::new());
        // Oracle with no current price would fail if it were consulted.
        let analyzer =
            SwapAnalyzer::new(WALLET, "bitcoin", MockOracle::default(), store).unwrap();

        let summary = analyzer.analyze().await.unwrap();
        assert_eq!(summary.swaps_detected, 0);
        assert_eq!(summary.ref_asset_amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn component_failure_marks_swap_but_skips_valuation() {
        let mut records = scenario_records();
        // An unresolvable asset in the first group's spend.
        records[0].asset = "MYSTERY".to_string();
        records[0].contract_address = None;
        records[0].category = TransferCategory::Erc20;
        let store = InMemoryStore::with_records(records);
        let analyzer =
            SwapAnalyzer::new(WALLET, "bitcoin", MockOracle::with_defaults(), store.clone())
                .unwrap();

        let summary = analyzer.analyze().await.unwrap();

        // Detection is decoupled from valuation.
        assert_eq!(summary.swaps_detected, 2);
        assert_eq!(summary.warnings.len(), 1);

        let failed_in = store.state(2);
        assert!(failed_in.is_swap);
        assert_eq!(failed_in.enrichment, SwapEnrichment::default());
        assert!(store.state(1).is_swap);

        // The sibling group still receives full valuation.
        let sibling = store.state(5);
        assert_eq!(sibling.enrichment.spent_usd, Some(dec("300")));
        assert_close(summary.ref_asset_amount, dec("0.0115384615"));
    }

    #[tokio::test]
    async fn missing_reference_price_keeps_usd_total() {
        let mut oracle = MockOracle::with_defaults();
        oracle.prices.remove(&(
            "bitcoin".to_string(),
            "2024-01-01".to_string(),
        ));
        let store = InMemoryStore::with_records(scenario_records());
        let analyzer = SwapAnalyzer::new(WALLET, "bitcoin", oracle, store.clone()).unwrap();

        let summary = analyzer.analyze().await.unwrap();

        let first_in = store.state(2);
        assert_eq!(first_in.enrichment.spent_usd, Some(dec("1000")));
        assert_eq!(first_in.enrichment.ref_price_at_purchase, None);
        assert_eq!(first_in.enrichment.ref_amount, None);
        assert_eq!(first_in.enrichment.ref_value_usd, None);

        // Only the group with a known reference price contributes.
        assert_close(summary.ref_asset_amount, dec("0.0115384615"));
        assert_eq!(summary.warnings.len(), 1);
    }

    #[tokio::test]
    async fn cost_basis_is_order_independent() {
        let forward = InMemoryStore::with_records(scenario_records());
        let mut reversed_records = scenario_records();
        reversed_records.reverse();
        let reversed = InMemoryStore::with_records(reversed_records);

        let oracle = MockOracle::with_defaults();
        SwapAnalyzer::new(WALLET, "bitcoin", oracle.clone(), forward.clone())
            .unwrap()
            .analyze()
            .await
            .unwrap();
        SwapAnalyzer::new(WALLET, "bitcoin", oracle, reversed.clone())
            .unwrap()
            .analyze()
            .await
            .unwrap();

        for id in [2, 5] {
            assert_eq!(
                forward.state(id).enrichment.spent_usd,
                reversed.state(id).enrichment.spent_usd
            );
        }
    }

    #[tokio::test]
    async fn rerun_reproduces_identical_enrichment() {
        let store = InMemoryStore::with_records(scenario_records());
        let analyzer =
            SwapAnalyzer::new(WALLET, "bitcoin", MockOracle::with_defaults(), store.clone())
                .unwrap();

        analyzer.analyze().await.unwrap();
        let first_pass: Vec<RowState> = (1..=6).map(|id| store.state(id)).collect();

        analyzer.analyze().await.unwrap();
        let second_pass: Vec<RowState> = (1..=6).map(|id| store.state(id)).collect();

        assert_eq!(first_pass, second_pass);
    }

    #[tokio::test]
    async fn null_and_nonpositive_values_are_excluded_from_aggregation() {
        let mut records = scenario_records();
        records.push(transfer(
            7,
            "0xswap1",
            "out-null",
            Some("2024-01-01T00:00:00Z"),
            WALLET,
            "0xDex",
            "USDC",
            None,
            Some(USDC_CONTRACT),
        ));
        records.push(transfer(
            8,
            "0xswap1",
            "out-zero",
            Some("2024-01-01T00:00:00Z"),
            WALLET,
            "0xDex",
            "USDC",
            Some("0"),
            Some(USDC_CONTRACT),
        ));
        let store = InMemoryStore::with_records(records);
        let analyzer =
            SwapAnalyzer::new(WALLET, "bitcoin", MockOracle::with_defaults(), store.clone())
                .unwrap();

        analyzer.analyze().await.unwrap();

        // The excluded legs change neither the total nor the asset count.
        let first_in = store.state(2);
        assert_eq!(first_in.enrichment.spent_asset.as_deref(), Some("USDC"));
        assert_eq!(first_in.enrichment.spent_usd, Some(dec("1000")));
    }

    #[tokio::test]
    async fn missing_timestamps_fall_back_to_analysis_time() {
        let records = vec![
            transfer(
                1,
                "0xswap1",
                "out-1",
                None,
                WALLET,
                "0xDex",
                "USDC",
                Some("100"),
                Some(USDC_CONTRACT),
            ),
            transfer(
                2,
                "0xswap1",
                "in-1",
                Some("not-a-timestamp"),
                "0xDex",
                WALLET,
                "TOKEN",
                Some("1"),
                Some("0xToken"),
            ),
        ];
        let mut oracle = MockOracle::with_defaults();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        oracle.set_price("usd-coin", &today, dec("1"));
        oracle.set_price("bitcoin", &today, dec("50000"));

        let store = InMemoryStore::with_records(records);
        let analyzer = SwapAnalyzer::new(WALLET, "bitcoin", oracle, store.clone()).unwrap();

        let summary = analyzer.analyze().await.unwrap();
        assert_eq!(summary.swaps_detected, 1);
        assert_close(store.state(2).enrichment.ref_amount.unwrap(), dec("0.002"));
    }

    #[tokio::test]
    async fn write_failure_is_reported_and_run_completes() {
        let mut store = InMemoryStore::with_records(scenario_records());
        store.fail_writes = true;
        let analyzer =
            SwapAnalyzer::new(WALLET, "bitcoin", MockOracle::with_defaults(), store.clone())
                .unwrap();

        let summary = analyzer.analyze().await.unwrap();
        assert_eq!(summary.swaps_detected, 2);
        assert_eq!(summary.warnings.len(), 2);
        // Nothing persisted, so nothing contributes to the totals.
        assert_eq!(summary.ref_asset_amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn wallet_comparison_is_case_insensitive() {
        let store = InMemoryStore::with_records(scenario_records());
        let analyzer = SwapAnalyzer::new(
            &WALLET.to_uppercase(),
            "bitcoin",
            MockOracle::with_defaults(),
            store.clone(),
        )
        .unwrap();

        let summary = analyzer.analyze().await.unwrap();
        assert_eq!(summary.swaps_detected, 2);
    }
}
