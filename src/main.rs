use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::str::FromStr;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use alchemy_client::AlchemyClient;
use coingecko_client::CoinGeckoClient;
use config_manager::SystemConfig;
use persistence_layer::SqliteStore;
use swap_core::{Chain, SwapAnalyzer};

#[derive(Parser)]
#[command(
    name = "swap_tracker",
    version,
    about = "Track wallet transfers across chains and value detected swaps"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch transfers for a wallet on all configured chains and store them
    Fetch {
        /// 0x-prefixed EVM wallet address
        wallet: String,

        /// Override the SQLite database path from the config
        #[arg(long)]
        db_path: Option<String>,
    },
    /// Detect swap transactions and enrich them with USD and
    /// reference-asset valuations
    Analyze {
        /// Wallet address used when fetching transfers
        wallet: String,

        /// Override the SQLite database path from the config
        #[arg(long)]
        db_path: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SystemConfig::load_from_path(&cli.config).context("failed to load config")?;

    match cli.command {
        Command::Fetch { wallet, db_path } => fetch(&config, &wallet, db_path).await,
        Command::Analyze { wallet, db_path } => analyze(&config, &wallet, db_path).await,
    }
}

async fn open_store(config: &SystemConfig, db_path: Option<String>) -> Result<(SqliteStore, String)> {
    let path = db_path.unwrap_or_else(|| config.database.path.clone());
    let store = SqliteStore::new(&path)
        .await
        .context("failed to open transaction store")?;
    store.init().await.context("failed to initialize schema")?;
    Ok((store, path))
}

async fn fetch(config: &SystemConfig, wallet: &str, db_path: Option<String>) -> Result<()> {
    config.alchemy.validate()?;
    alchemy_client::validate_address(wallet)?;

    let (store, db_path) = open_store(config, db_path).await?;
    let client = AlchemyClient::new(config.alchemy.clone(), &config.spam)?;

    let mut chains_failed = 0usize;
    let mut total_inserted = 0u64;
    for chain_name in &config.chains {
        let chain = match Chain::from_str(chain_name) {
            Ok(chain) => chain,
            Err(e) => {
                error!("Skipping configured chain: {}", e);
                chains_failed += 1;
                continue;
            }
        };
        info!("[{}] fetching transfers (external + erc20, spam filtered)", chain);
        match client.fetch_all_for_chain(wallet, chain).await {
            Ok(transfers) => {
                let inserted = store.insert_transfers(chain, &transfers).await?;
                info!(
                    "[{}] fetched {} transfers, inserted {} new rows",
                    chain,
                    transfers.len(),
                    inserted
                );
                total_inserted += inserted;
            }
            Err(e) => {
                // One chain failing does not abort the others.
                error!("[{}] fetch failed: {}", chain, e);
                chains_failed += 1;
            }
        }
    }

    println!("Done. Inserted {} new rows into {}.", total_inserted, db_path);
    if chains_failed == config.chains.len() {
        bail!("all configured chains failed to fetch");
    }
    Ok(())
}

async fn analyze(config: &SystemConfig, wallet: &str, db_path: Option<String>) -> Result<()> {
    config.coingecko.validate()?;

    let (store, _) = open_store(config, db_path).await?;
    let oracle = CoinGeckoClient::new(config.coingecko.clone())
        .context("failed to build CoinGecko client")?;

    let analyzer = SwapAnalyzer::new(
        wallet,
        &config.coingecko.reference_asset_id,
        oracle,
        store,
    )?;
    let summary = analyzer.analyze().await?;

    println!(
        "Detected {} swaps. {} amount: {:.8}, current value: ${:.2} ({} price ${:.2}).",
        summary.swaps_detected,
        config.coingecko.reference_asset_id,
        summary.ref_asset_amount,
        summary.ref_asset_value_usd,
        config.coingecko.reference_asset_id,
        summary.ref_asset_price_current,
    );
    if !summary.warnings.is_empty() {
        println!(
            "{} group(s) degraded to partial enrichment; see log for details.",
            summary.warnings.len()
        );
    }
    Ok(())
}
