use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::{pubkey, pubkey::Pubkey, signature::Signature};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SniperError, SniperResult};
use crate::solana::raydium::{PoolKeyResolver, RAYDIUM_AMM_V4};
use crate::trading::filters::{FilterGate, PoolFilters};
use crate::trading::is_venue_mint;
use crate::trading::monitor::MonitorHandle;
use crate::trading::orders::{Direction, OrderExecutor, OrderRequest};
use crate::trading::signal::parse_signal;

/// Account that logs every launchpad → Raydium migration.
pub const MIGRATION_ACCOUNT: Pubkey = pubkey!("39azUYFWPz3VHgKCf3VChUwbpURdCHRxjWVowf5jUJjg");

#[derive(Debug, Clone, PartialEq)]
pub struct SnipeSettings {
    pub amount_lamports: u64,
    pub slippage_pct: f64,
    pub max_attempts: u32,
}

/// The launchpad mint created by a migration transaction, if it opened a Raydium pool.
pub fn migrated_mint(account_keys: &[Pubkey]) -> Option<Pubkey> {
    if !account_keys.contains(&RAYDIUM_AMM_V4) {
        return None;
    }
    account_keys.iter().copied().find(is_venue_mint)
}

pub struct ListingSniper {
    executor: Arc<OrderExecutor>,
    resolver: Arc<PoolKeyResolver>,
    filters: Arc<PoolFilters>,
    gate: FilterGate,
    monitor: MonitorHandle,
    settings: SnipeSettings,
    claimed: Mutex<HashSet<Pubkey>>, // Buying or tracked
}

impl ListingSniper {
    pub fn new(
        executor: Arc<OrderExecutor>,
        resolver: Arc<PoolKeyResolver>,
        filters: Arc<PoolFilters>,
        gate: FilterGate,
        monitor: MonitorHandle,
        settings: SnipeSettings,
    ) -> Self {
        Self {
            executor,
            resolver,
            filters,
            gate,
            monitor,
            settings,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// Follows migration logs until the stream ends. Each migration is handled
    /// on its own task so a slow filter gate never blocks the next listing.
    pub async fn run(self: Arc<Self>) -> SniperResult<()> {
        let subscription = self.executor.ledger().subscribe_logs(&MIGRATION_ACCOUNT).await?;
        let (mut notices, _handle) = subscription.into_parts();
        info!("Listening for migrations on {}", MIGRATION_ACCOUNT);

        while let Some(notice) = notices.recv().await {
            if let Some(err) = notice.err {
                debug!("Skipping failed migration tx {}: {}", notice.signature, err);
                continue;
            }
            let sniper = self.clone();
            tokio::spawn(async move {
                sniper.on_migration(notice.signature).await;
            });
        }

        warn!("Migration log stream ended");
        Err(SniperError::ChannelClosed("migration logs".to_string()))
    }

    /// Drops the claim on every mint the monitor stops tracking, so a
    /// closed position can be bought again.
    pub fn spawn_release_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut released = self.monitor.subscribe_released();
        let sniper = self.clone();
        tokio::spawn(async move {
            loop {
                match released.recv().await {
                    Ok(mint) => {
                        if sniper.claimed.lock().await.remove(&mint) {
                            debug!("Released claim on {}", mint);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Missed {} released mints", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn on_migration(&self, signature: Signature) {
        let account_keys = match self.executor.ledger().get_transaction_account_keys(&signature).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Could not load migration tx {}: {}", signature, e);
                return;
            }
        };
        let Some(mint) = migrated_mint(&account_keys) else {
            debug!("Migration tx {} opened no Raydium pool for a launchpad mint", signature);
            return;
        };

        info!("Migration {} listed {}", signature, mint);
        if let Err(e) = self.snipe(mint, true).await {
            warn!("Snipe of {} failed: {}", mint, e);
        }
    }

    /// Buys the token a chat message points at, skipping the filter gate.
    pub async fn on_message(&self, message: &str) -> SniperResult<Option<Signature>> {
        let Some(signal) = parse_signal(message) else {
            debug!("No token address in message");
            return Ok(None);
        };
        info!("Signal: {} from {}", signal.mint, signal.source);
        self.snipe(signal.mint, false).await
    }

    /// Resolves the pool, optionally waits for the filters, buys and hands the
    /// position to the monitor. Returns `None` when nothing was bought.
    pub async fn snipe(&self, mint: Pubkey, gated: bool) -> SniperResult<Option<Signature>> {
        if !self.claim(mint).await {
            debug!("Buy loop for {} already running", mint);
            return Ok(None);
        }

        let result = self.buy(mint, gated).await;
        if !matches!(result, Ok(Some(_))) {
            self.claimed.lock().await.remove(&mint);
        }
        result
    }

    async fn claim(&self, mint: Pubkey) -> bool {
        self.claimed.lock().await.insert(mint)
    }

    async fn buy(&self, mint: Pubkey, gated: bool) -> SniperResult<Option<Signature>> {
        let keys = self.resolver.resolve(&mint).await?;

        if gated && !self.gate.wait_for_match(&self.filters, &keys).await {
            info!("{} rejected by filters", mint);
            return Ok(None);
        }

        let request = OrderRequest {
            direction: Direction::Buy,
            amount: self.settings.amount_lamports,
            slippage_pct: self.settings.slippage_pct,
            fee: None,
            max_attempts: self.settings.max_attempts,
        };
        let signature = self.executor.submit(&keys, &request).await?;

        let entry_sol = self.settings.amount_lamports as f64 / LAMPORTS_PER_SOL as f64;
        if !self.monitor.track(keys.clone(), entry_sol) {
            warn!("Monitor is gone; {} bought but not tracked", mint);
        }
        Ok(Some(signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pool::sample_pool_keys;
    use crate::models::{PoolKeys, VaultSide};
    use crate::solana::ledger::LogNotice;
    use crate::solana::token::encode_token_account;
    use crate::trading::filters::PumpVenueFilter;
    use crate::trading::monitor::MonitorCommand;
    use crate::trading::position::tests::{wait_for, Harness};
    use std::str::FromStr;
    use tokio::sync::mpsc;
    use tokio::time::Duration;

    const PUMP_MINT: &str = "GJaMqbyKJ9FGimoL9dHfuNd8vGvi83Ew4d9MHdFbpump";

    struct Setup {
        harness: Harness,
        sniper: Arc<ListingSniper>,
        monitor: MonitorHandle,
        commands: mpsc::UnboundedReceiver<MonitorCommand>,
        keys: PoolKeys,
    }

    /// Sniper over a seeded pool for `mint`; the gate runs a single venue check.
    async fn setup(mint: Pubkey) -> Setup {
        let harness = Harness::new(None);
        let keys = sample_pool_keys(mint, true);
        harness.ledger.set_account(
            keys.vault(VaultSide::Base),
            encode_token_account(&mint, &keys.authority, 1_000_000_000),
        );
        harness.ledger.set_account(
            keys.vault(VaultSide::Quote),
            encode_token_account(&spl_token::native_mint::id(), &keys.authority, 1_000_000_000_000),
        );
        harness
            .ledger
            .set_balance(harness.ctx.executor.wallet().get_public_key(), LAMPORTS_PER_SOL);

        let resolver = Arc::new(PoolKeyResolver::new(harness.ledger.clone()));
        resolver.seed(keys.clone()).await;

        let (tx, commands) = mpsc::unbounded_channel();
        let monitor = MonitorHandle::from_sender(tx);
        let gate = FilterGate {
            check_interval: Duration::from_millis(10),
            check_duration: Duration::from_millis(10),
            consecutive_match_count: 1,
        };
        let sniper = Arc::new(ListingSniper::new(
            harness.ctx.executor.clone(),
            resolver,
            Arc::new(PoolFilters::new(vec![Arc::new(PumpVenueFilter)])),
            gate,
            monitor.clone(),
            SnipeSettings {
                amount_lamports: LAMPORTS_PER_SOL / 10,
                slippage_pct: 25.0,
                max_attempts: 2,
            },
        ));
        Setup {
            harness,
            sniper,
            monitor,
            commands,
            keys,
        }
    }

    #[test]
    fn migrated_mint_requires_raydium_and_venue_suffix() {
        let pump = Pubkey::from_str(PUMP_MINT).unwrap();
        let other = Pubkey::new_unique();
        assert_eq!(migrated_mint(&[other, pump]), None);
        assert_eq!(migrated_mint(&[other, RAYDIUM_AMM_V4]), None);
        assert_eq!(migrated_mint(&[other, RAYDIUM_AMM_V4, pump]), Some(pump));
    }

    #[tokio::test]
    async fn migration_log_buys_and_tracks() {
        let mint = Pubkey::from_str(PUMP_MINT).unwrap();
        let mut setup = setup(mint).await;
        let ledger = setup.harness.ledger.clone();

        let signature = Signature::new_unique();
        ledger.set_transaction_keys(signature, vec![Pubkey::new_unique(), RAYDIUM_AMM_V4, mint]);
        let failed = Signature::new_unique();
        ledger.set_transaction_keys(failed, vec![RAYDIUM_AMM_V4, mint]);

        tokio::spawn(setup.sniper.clone().run());
        wait_for(|| ledger.has_log_subscriber(&MIGRATION_ACCOUNT)).await;

        ledger.push_log(
            MIGRATION_ACCOUNT,
            LogNotice {
                signature: failed,
                err: Some("InstructionError".into()),
            },
        );
        ledger.push_log(MIGRATION_ACCOUNT, LogNotice { signature, err: None });

        match setup.commands.recv().await {
            Some(MonitorCommand::Track { keys, entry_sol }) => {
                assert_eq!(keys.token_mint(), mint);
                assert_eq!(keys.id, setup.keys.id);
                assert!((entry_sol - 0.1).abs() < 1e-12);
            }
            _ => panic!("expected track command"),
        }
        assert_eq!(ledger.sent_count(), 1);
    }

    #[tokio::test]
    async fn gate_rejection_buys_nothing_but_messages_skip_it() {
        // Not a launchpad mint, so the venue filter never passes
        let mint = Pubkey::new_unique();
        let mut setup = setup(mint).await;

        assert_eq!(setup.sniper.snipe(mint, true).await.unwrap(), None);
        assert_eq!(setup.harness.ledger.sent_count(), 0);

        let message = format!("new gem https://dexscreener.com/solana/{}", mint);
        let signature = setup.sniper.on_message(&message).await.unwrap();
        assert!(signature.is_some());
        assert_eq!(setup.harness.ledger.sent_count(), 1);
        assert!(matches!(
            setup.commands.recv().await,
            Some(MonitorCommand::Track { .. })
        ));
    }

    #[tokio::test]
    async fn one_buy_loop_per_mint() {
        let mint = Pubkey::from_str(PUMP_MINT).unwrap();
        let setup = setup(mint).await;

        assert!(setup.sniper.claim(mint).await);
        assert_eq!(setup.sniper.snipe(mint, false).await.unwrap(), None);
        assert_eq!(setup.harness.ledger.sent_count(), 0);
    }

    #[tokio::test]
    async fn failed_buy_releases_the_mint() {
        let mint = Pubkey::from_str(PUMP_MINT).unwrap();
        let setup = setup(mint).await;
        setup
            .harness
            .ledger
            .set_balance(setup.harness.ctx.executor.wallet().get_public_key(), 0);

        let err = setup.sniper.snipe(mint, false).await.unwrap_err();
        assert!(matches!(err, SniperError::InsufficientBalance(_)));
        assert!(setup.sniper.claim(mint).await);

        assert_eq!(setup.sniper.on_message("nothing to see").await.unwrap(), None);
    }

    #[tokio::test]
    async fn closed_position_can_be_bought_again() {
        let mint = Pubkey::from_str(PUMP_MINT).unwrap();
        let mut setup = setup(mint).await;
        setup.sniper.spawn_release_listener();

        assert!(setup.sniper.snipe(mint, false).await.unwrap().is_some());
        assert!(matches!(setup.commands.recv().await, Some(MonitorCommand::Track { .. })));
        assert_eq!(setup.sniper.snipe(mint, false).await.unwrap(), None);
        assert_eq!(setup.harness.ledger.sent_count(), 1);

        setup.monitor.release(mint);
        let sniper = setup.sniper.clone();
        wait_for(|| sniper.claimed.try_lock().map_or(false, |claimed| !claimed.contains(&mint))).await;

        assert!(setup.sniper.snipe(mint, false).await.unwrap().is_some());
        assert_eq!(setup.harness.ledger.sent_count(), 2);
    }
}
