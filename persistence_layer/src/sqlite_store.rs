use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use swap_core::{Chain, NewTransfer, StoreError, SwapEnrichment, TransferRecord, TransferStore};

const CREATE_TRANSACTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chain TEXT NOT NULL,
    tx_hash TEXT NOT NULL,
    unique_id TEXT NOT NULL DEFAULT '',
    block_number INTEGER,
    block_timestamp TEXT,
    from_address TEXT,
    to_address TEXT,
    asset TEXT,
    value REAL,
    raw_value_wei TEXT,
    category TEXT,
    contract_address TEXT,
    is_swap INTEGER NOT NULL DEFAULT 0,
    swap_spent_asset TEXT,
    swap_spent_amount REAL,
    swap_spent_usd REAL,
    swap_ref_price_at_purchase REAL,
    swap_ref_amount REAL,
    swap_ref_price_current REAL,
    swap_ref_value_usd REAL,
    raw_json TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(chain, tx_hash, unique_id)
)
"#;

const CREATE_DENYLIST_ADDRESSES: &str =
    "CREATE TABLE IF NOT EXISTS denylist_addresses (address TEXT PRIMARY KEY)";
const CREATE_DENYLIST_CONTRACTS: &str =
    "CREATE TABLE IF NOT EXISTS denylist_contracts (address TEXT PRIMARY KEY)";

/// Enrichment columns added to a pre-existing table without data loss.
const ENRICHMENT_COLUMNS: [(&str, &str); 8] = [
    ("is_swap", "INTEGER NOT NULL DEFAULT 0"),
    ("swap_spent_asset", "TEXT"),
    ("swap_spent_amount", "REAL"),
    ("swap_spent_usd", "REAL"),
    ("swap_ref_price_at_purchase", "REAL"),
    ("swap_ref_amount", "REAL"),
    ("swap_ref_price_current", "REAL"),
    ("swap_ref_value_usd", "REAL"),
];

/// SQLite transaction store.
///
/// Decimal enrichment values are converted to `f64` here, at the
/// persistence boundary; all upstream arithmetic stays in `Decimal`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path`. Connection
    /// failures are [`StoreError::Unavailable`] and fatal to the caller.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| StoreError::Unavailable(e.to_string()))?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        }
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

        // The analyzer is sequential; one connection keeps in-memory
        // databases alive and file databases free of writer contention.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!("Opened SQLite store at {}", path);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the schema if absent and add any enrichment columns missing
    /// from a pre-existing table. Safe to call on every startup.
    pub async fn init(&self) -> Result<(), StoreError> {
        for statement in [
            CREATE_TRANSACTIONS,
            CREATE_DENYLIST_ADDRESSES,
            CREATE_DENYLIST_CONTRACTS,
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(query_err)?;
        }
        self.ensure_enrichment_columns().await
    }

    async fn ensure_enrichment_columns(&self) -> Result<(), StoreError> {
        let rows = sqlx::query("PRAGMA table_info(transactions)")
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;
        let existing: Vec<String> = rows
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<_, _>>()
            .map_err(query_err)?;

        for (column, definition) in ENRICHMENT_COLUMNS {
            if !existing.iter().any(|name| name == column) {
                debug!("Adding column {} to transactions", column);
                sqlx::query(&format!(
                    "ALTER TABLE transactions ADD COLUMN {} {}",
                    column, definition
                ))
                .execute(&self.pool)
                .await
                .map_err(query_err)?;
            }
        }
        Ok(())
    }

    /// Insert a batch of transfers for one chain. `INSERT OR IGNORE`
    /// against the `(chain, tx_hash, unique_id)` key makes re-runs
    /// idempotent. Returns the number of newly inserted rows.
    pub async fn insert_transfers(
        &self,
        chain: Chain,
        transfers: &[NewTransfer],
    ) -> Result<u64, StoreError> {
        if transfers.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(query_err)?;
        let mut inserted = 0u64;
        for transfer in transfers {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO transactions
                (chain, tx_hash, unique_id, block_number, block_timestamp, from_address,
                 to_address, asset, value, raw_value_wei, category, contract_address, raw_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(chain.as_str())
            .bind(&transfer.tx_hash)
            .bind(&transfer.unique_id)
            .bind(transfer.block_number)
            .bind(&transfer.block_timestamp)
            .bind(&transfer.from_address)
            .bind(&transfer.to_address)
            .bind(&transfer.asset)
            .bind(transfer.value)
            .bind(&transfer.raw_value_wei)
            .bind(transfer.category.as_str())
            .bind(&transfer.contract_address)
            .bind(&transfer.raw_json)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
            inserted += result.rows_affected();
        }
        tx.commit().await.map_err(query_err)?;

        debug!(
            "Inserted {}/{} transfers for {}",
            inserted,
            transfers.len(),
            chain
        );
        Ok(inserted)
    }
}

fn query_err(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TransferRecord, StoreError> {
    let chain: String = row.try_get("chain").map_err(query_err)?;
    let category: String = row.try_get("category").map_err(query_err)?;
    let value: Option<f64> = row.try_get("value").map_err(query_err)?;

    Ok(TransferRecord {
        id: row.try_get("id").map_err(query_err)?,
        chain: chain.parse().map_err(StoreError::Query)?,
        tx_hash: row.try_get("tx_hash").map_err(query_err)?,
        unique_id: row.try_get("unique_id").map_err(query_err)?,
        block_number: row.try_get("block_number").map_err(query_err)?,
        block_timestamp: row.try_get("block_timestamp").map_err(query_err)?,
        from_address: row
            .try_get::<Option<String>, _>("from_address")
            .map_err(query_err)?
            .unwrap_or_default(),
        to_address: row
            .try_get::<Option<String>, _>("to_address")
            .map_err(query_err)?
            .unwrap_or_default(),
        asset: row
            .try_get::<Option<String>, _>("asset")
            .map_err(query_err)?
            .unwrap_or_default(),
        // A stored value either converts to a decimal or the leg is
        // excluded from aggregation; no silent zero substitution.
        value: value.and_then(|v| Decimal::try_from(v).ok()),
        contract_address: row.try_get("contract_address").map_err(query_err)?,
        category: category.parse().map_err(StoreError::Query)?,
    })
}

fn in_placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[async_trait]
impl TransferStore for SqliteStore {
    /// Ascending by block timestamp; ISO-8601 strings compare in time
    /// order. Rows without a timestamp sort first (SQLite puts NULLs first
    /// in ASC), with the row id as a stable tiebreaker.
    async fn all_ordered_by_timestamp(&self) -> Result<Vec<TransferRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, chain, tx_hash, unique_id, block_number, block_timestamp,
                   from_address, to_address, asset, value, category, contract_address
            FROM transactions
            WHERE category IN ('external', 'erc20')
            ORDER BY block_timestamp ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn mark_swap(&self, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE transactions SET is_swap = 1 WHERE id IN ({})",
            in_placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await.map_err(query_err)?;
        Ok(())
    }

    async fn write_enrichment(
        &self,
        ids: &[i64],
        enrichment: &SwapEnrichment,
    ) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            r#"
            UPDATE transactions
            SET is_swap = 1,
                swap_spent_asset = ?,
                swap_spent_amount = ?,
                swap_spent_usd = ?,
                swap_ref_price_at_purchase = ?,
                swap_ref_amount = ?,
                swap_ref_price_current = ?,
                swap_ref_value_usd = ?
            WHERE id IN ({})
            "#,
            in_placeholders(ids.len())
        );

        let mut query = sqlx::query(&sql)
            .bind(&enrichment.spent_asset)
            .bind(enrichment.spent_amount.and_then(|d| d.to_f64()))
            .bind(enrichment.spent_usd.and_then(|d| d.to_f64()))
            .bind(enrichment.ref_price_at_purchase.and_then(|d| d.to_f64()))
            .bind(enrichment.ref_amount.and_then(|d| d.to_f64()))
            .bind(enrichment.ref_price_current.and_then(|d| d.to_f64()))
            .bind(enrichment.ref_value_usd.and_then(|d| d.to_f64()));
        for id in ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await.map_err(query_err)?;
        Ok(())
    }
}
