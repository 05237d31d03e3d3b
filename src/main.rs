use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use solana_sdk::native_token::sol_to_lamports;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod error;
mod models;
mod settings;
mod solana;
mod trading;

use crate::api::{BirdeyeClient, DexscreenerClient, PairStats, PriceQuotes};
use crate::config::Config;
use crate::settings::{SettingsStore, SETTINGS_FILE};
use crate::solana::client::SolanaClient;
use crate::solana::ledger::LedgerClient;
use crate::solana::raydium::PoolKeyResolver;
use crate::solana::wallet::WalletManager;
use crate::trading::holders::{holder_reports, largest_holdings, pool_vaults};
use crate::trading::monitor::enumerate_existing;
use crate::trading::signal::parse_signal;
use crate::trading::swap_math::ConstantProduct;
use crate::trading::{
    ListingSniper, OrderExecutor, PoolFilters, PositionContext, PositionMonitor, PriceResolver, SnipeSettings,
};

#[derive(Parser)]
#[command(name = "listing-sniper")]
#[command(about = "Snipes new Raydium listings and manages the positions", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = SETTINGS_FILE)]
    settings: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for migrations, buy what passes the filters and manage positions
    Run {
        /// Also buy tokens named in lines read from stdin
        #[arg(long)]
        signals_stdin: bool,
    },
    /// Inspect or edit the settings file
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Show which token a message would trigger a buy for
    Parse { message: String },
    /// Print the recent USD price series of a token
    History {
        mint: String,
        /// Candle resolution (1m, 5m, 15m, 1H, ...)
        #[arg(long, default_value = "1m")]
        interval: String,
        #[arg(long, default_value = "1")]
        hours: i64,
    },
    /// List the largest holders of a token outside its pool
    Holders {
        mint: String,
        #[arg(long, default_value = "10")]
        count: usize,
        /// SOL balance from which a holder is flagged as a whale
        #[arg(long, default_value = "100")]
        whale_sol: f64,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Set { key: String, value: String },
    NewWallet,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let store = SettingsStore::new(&cli.settings);

    match cli.command {
        Command::Run { signals_stdin } => run(&store, signals_stdin).await,
        Command::Settings { action } => settings_command(&store, action),
        Command::Parse { message } => {
            match parse_signal(&message) {
                Some(signal) => println!("{} ({})", signal.mint, signal.source),
                None => println!("no token address found"),
            }
            Ok(())
        }
        Command::History { mint, interval, hours } => history(&mint, &interval, hours).await,
        Command::Holders { mint, count, whale_sol } => holders(&store, &mint, count, whale_sol).await,
    }
}

async fn holders(store: &SettingsStore, mint: &str, count: usize, whale_sol: f64) -> Result<()> {
    let settings = store.load()?;
    if settings.rpc_url.trim().is_empty() {
        anyhow::bail!("rpcUrl is empty; run `settings set rpcUrl <url>`");
    }
    let config = Config::load()?;
    let mint = Pubkey::from_str(mint).with_context(|| format!("Invalid mint {}", mint))?;
    let ledger: Arc<dyn LedgerClient> = Arc::new(
        SolanaClient::connect(&settings.rpc_url, &config.ws_url_for(&settings.rpc_url)).await?,
    );

    let exclude = match PoolKeyResolver::new(ledger.clone()).resolve(&mint).await {
        Ok(keys) => pool_vaults(&keys).to_vec(),
        Err(e) => {
            warn!("No pool for {} ({}); pool vaults are not excluded", mint, e);
            Vec::new()
        }
    };
    let holdings = largest_holdings(ledger.as_ref(), &mint, &exclude, count).await?;
    for report in holder_reports(ledger.as_ref(), holdings).await? {
        println!("Holder: {}", report.owner);
        println!("  token account: {}", report.holding.account.address);
        println!(
            "  holds: {} ({:.2}% of supply)",
            report.holding.account.ui_amount, report.holding.share_pct
        );
        println!("  SOL balance: {:.5}", report.sol_balance);
        println!("  token accounts: {}", report.token_accounts);
        println!("  whale: {}", if report.sol_balance >= whale_sol { "yes" } else { "no" });
        println!("  https://dexscreener.com/solana/{}?maker={}", mint, report.owner);
    }
    Ok(())
}

async fn history(mint: &str, interval: &str, hours: i64) -> Result<()> {
    let config = Config::load()?;
    let mint = Pubkey::from_str(mint).with_context(|| format!("Invalid mint {}", mint))?;
    let birdeye = BirdeyeClient::new(config.birdeye_api_key.as_deref().unwrap_or_default())?;

    let to = Utc::now();
    let from = to - chrono::Duration::hours(hours);
    let points = birdeye.price_history(&mint, interval, from, to).await?;
    for point in &points {
        let time = point.time().map(|t| t.to_rfc3339()).unwrap_or_else(|| point.unix_time.to_string());
        println!("{}  {}", time, point.value);
    }
    info!("{} price points for {}", points.len(), mint);
    Ok(())
}

fn settings_command(store: &SettingsStore, action: SettingsAction) -> Result<()> {
    match action {
        SettingsAction::Show => {
            let settings = store.load()?;
            println!("Settings ({}):", store.path().display());
            for (key, value) in settings.describe() {
                println!("  {}: {}", key, value);
            }
        }
        SettingsAction::Set { key, value } => {
            store
                .set(&key, &value)
                .with_context(|| format!("Failed to set {}", key))?;
            println!("{} updated", key);
        }
        SettingsAction::NewWallet => {
            let wallet = store.new_wallet()?;
            println!("New wallet: {}", wallet.get_public_key());
        }
    }
    Ok(())
}

async fn run(store: &SettingsStore, signals_stdin: bool) -> Result<()> {
    let settings = store.load()?;
    settings.validate().context("Settings are not usable for trading")?;
    let config = Config::load()?;
    info!("Configuration loaded successfully");

    let wallet = WalletManager::new(&settings.secret_key)?;
    info!("Wallet: {}", wallet.get_public_key());

    let ws_url = config.ws_url_for(&settings.rpc_url);
    let ledger: Arc<dyn LedgerClient> = Arc::new(SolanaClient::connect(&settings.rpc_url, &ws_url).await?);

    let birdeye = Arc::new(BirdeyeClient::new(config.birdeye_api_key.as_deref().unwrap_or_default())?);
    let fallback_quotes: Option<Arc<dyn PriceQuotes>> = match config.birdeye_api_key {
        Some(_) => Some(birdeye.clone() as Arc<dyn PriceQuotes>),
        None => {
            warn!("BIRDEYE_API_KEY not set; valuation has no quote fallback");
            None
        }
    };
    let pairs: Arc<dyn PairStats> = Arc::new(DexscreenerClient::new()?);

    let executor = Arc::new(OrderExecutor::new(
        ledger.clone(),
        wallet,
        Arc::new(ConstantProduct::default()),
        config.order_config(),
    ));
    let prices = Arc::new(PriceResolver::new(ledger.clone(), fallback_quotes, config.price_cache_ttl()));
    let ctx = Arc::new(PositionContext {
        executor: executor.clone(),
        prices,
        rules: config.exit_rules(),
        settings: config.position_settings(settings.slippage_pct),
    });

    let (monitor, monitor_handle) = PositionMonitor::new(ctx.clone(), config.sell_interval());
    let monitor_task = tokio::spawn(monitor.run());

    let resolver = Arc::new(PoolKeyResolver::new(ledger.clone()));
    if let Err(e) = enumerate_existing(&ctx, &resolver, &monitor_handle, settings.snipe_amount).await {
        warn!("Startup enumeration failed: {}", e);
    }

    let filters = Arc::new(PoolFilters::from_args(&config.filter_args(), ledger, birdeye, pairs));
    info!("Filters: {:?}", filters.names());

    let sniper = Arc::new(ListingSniper::new(
        executor,
        resolver,
        filters,
        config.filter_gate(),
        monitor_handle.clone(),
        SnipeSettings {
            amount_lamports: sol_to_lamports(settings.snipe_amount),
            slippage_pct: settings.slippage_pct,
            max_attempts: settings.max_buy_attempts,
        },
    ));
    let release_listener = sniper.spawn_release_listener();

    if signals_stdin {
        let sniper = sniper.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let sniper = sniper.clone();
                        tokio::spawn(async move {
                            if let Err(e) = sniper.on_message(&line).await {
                                warn!("Signal buy failed: {}", e);
                            }
                        });
                    }
                    Ok(None) => {
                        info!("Signal input closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read signal input: {}", e);
                        break;
                    }
                }
            }
        });
    }

    info!("Starting listing sniper...");
    let outcome = tokio::select! {
        result = sniper.run() => result.context("Migration listener stopped"),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    };

    release_listener.abort();
    monitor_handle.shutdown();
    if let Err(e) = monitor_task.await {
        error!("Monitor task failed: {}", e);
    }
    outcome
}
