use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{SniperError, SniperResult};
use crate::models::PoolKeys;
use crate::solana::ledger::AccountFilter;
use crate::solana::raydium::PoolKeyResolver;
use crate::solana::token::{
    decode_token_account, to_ui_amount, token_balance_update, TOKEN_ACCOUNT_LEN, TOKEN_ACCOUNT_OWNER_OFFSET,
};
use crate::trading::is_venue_mint;
use crate::trading::position::{spawn_position, PositionContext, PositionEvent, PositionHandle};

/// A token account whose close failed after its position ended.
#[derive(Debug, Clone)]
pub struct PendingClose {
    pub keys: Arc<PoolKeys>,
    pub entry_sol: f64,
    pub account: Pubkey,
    pub rounds_left: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    Gone,     // Already closed elsewhere
    Refilled, // Holds more than dust again
}

pub enum MonitorCommand {
    Track { keys: Arc<PoolKeys>, entry_sol: f64 },
    Activated { handle: PositionHandle },
    InitFailed { mint: Pubkey },
    Remove { mint: Pubkey },
    RetryClose { pending: PendingClose },
    CloseSettled { mint: Pubkey, result: Result<CloseOutcome, String> },
    Positions { reply: oneshot::Sender<Vec<Pubkey>> },
    PendingCloses { reply: oneshot::Sender<Vec<Pubkey>> },
    Shutdown,
}

const RELEASE_CAPACITY: usize = 256;

/// Cloneable front door to the monitor task.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::UnboundedSender<MonitorCommand>,
    released: broadcast::Sender<Pubkey>,
}

impl MonitorHandle {
    pub(crate) fn from_sender(tx: mpsc::UnboundedSender<MonitorCommand>) -> Self {
        let (released, _) = broadcast::channel(RELEASE_CAPACITY);
        Self { tx, released }
    }

    /// Mints the monitor stopped tracking, so a later signal may buy them again.
    pub fn subscribe_released(&self) -> broadcast::Receiver<Pubkey> {
        self.released.subscribe()
    }

    pub(crate) fn release(&self, mint: Pubkey) {
        let _ = self.released.send(mint); // No receivers is fine
    }

    /// Queues a failed close for re-attempts on the following sweeps.
    pub fn retry_close(&self, pending: PendingClose) {
        let _ = self.tx.send(MonitorCommand::RetryClose { pending });
    }

    fn close_settled(&self, mint: Pubkey, result: Result<CloseOutcome, String>) {
        let _ = self.tx.send(MonitorCommand::CloseSettled { mint, result });
    }

    /// Starts tracking the pool's token unless it is already tracked or pending.
    pub fn track(&self, keys: Arc<PoolKeys>, entry_sol: f64) -> bool {
        self.tx.send(MonitorCommand::Track { keys, entry_sol }).is_ok()
    }

    pub fn activated(&self, handle: PositionHandle) -> bool {
        self.tx.send(MonitorCommand::Activated { handle }).is_ok()
    }

    pub fn remove(&self, mint: Pubkey) {
        let _ = self.tx.send(MonitorCommand::Remove { mint });
    }

    fn init_failed(&self, mint: Pubkey) {
        let _ = self.tx.send(MonitorCommand::InitFailed { mint });
    }

    pub async fn positions(&self) -> SniperResult<Vec<Pubkey>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MonitorCommand::Positions { reply })
            .map_err(|_| SniperError::ChannelClosed("position monitor".to_string()))?;
        rx.await
            .map_err(|_| SniperError::ChannelClosed("position monitor".to_string()))
    }

    pub async fn pending_closes(&self) -> SniperResult<Vec<Pubkey>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MonitorCommand::PendingCloses { reply })
            .map_err(|_| SniperError::ChannelClosed("position monitor".to_string()))?;
        rx.await
            .map_err(|_| SniperError::ChannelClosed("position monitor".to_string()))
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(MonitorCommand::Shutdown);
    }
}

/// Owns the registry of tracked positions and drives the periodic sweep.
pub struct PositionMonitor {
    ctx: Arc<PositionContext>,
    positions: HashMap<Pubkey, PositionHandle>,
    pending: HashSet<Pubkey>, // Subscribing, not yet active
    closes: HashMap<Pubkey, PendingClose>,
    closing: HashSet<Pubkey>, // Close re-attempt running
    sweep_interval: Duration,
    handle: MonitorHandle,
    commands: mpsc::UnboundedReceiver<MonitorCommand>,
}

impl PositionMonitor {
    pub fn new(ctx: Arc<PositionContext>, sweep_interval: Duration) -> (Self, MonitorHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let handle = MonitorHandle::from_sender(tx);
        let monitor = Self {
            ctx,
            positions: HashMap::new(),
            pending: HashSet::new(),
            closes: HashMap::new(),
            closing: HashSet::new(),
            sweep_interval,
            handle: handle.clone(),
            commands,
        };
        (monitor, handle)
    }

    pub async fn run(mut self) {
        info!("Position monitor started (sweep every {:?})", self.sweep_interval);
        let mut ticker = interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep(),
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command) {
                        break;
                    }
                }
            }
        }
        info!("Position monitor stopped");
    }

    fn handle_command(&mut self, command: MonitorCommand) -> bool {
        match command {
            MonitorCommand::Track { keys, entry_sol } => self.track(keys, entry_sol),
            MonitorCommand::Activated { handle } => {
                self.pending.remove(&handle.mint);
                if handle.is_closed() {
                    debug!("Position {} exited before activation", handle.mint);
                } else {
                    info!("Position {} active ({} tracked)", handle.mint, self.positions.len() + 1);
                    self.positions.insert(handle.mint, handle);
                }
            }
            MonitorCommand::InitFailed { mint } => {
                self.pending.remove(&mint);
                self.handle.release(mint);
            }
            MonitorCommand::Remove { mint } => {
                let was_pending = self.pending.remove(&mint);
                if self.positions.remove(&mint).is_some() {
                    info!("Stopped tracking {} ({} tracked)", mint, self.positions.len());
                    self.handle.release(mint);
                } else if was_pending {
                    self.handle.release(mint);
                }
            }
            MonitorCommand::RetryClose { pending } => {
                let mint = pending.keys.token_mint();
                if pending.rounds_left == 0 {
                    warn!("Giving up on closing {}; left for startup enumeration", pending.account);
                } else {
                    info!("Re-attempting close of {} on the next sweeps", pending.account);
                    self.closes.insert(mint, pending);
                }
            }
            MonitorCommand::CloseSettled { mint, result } => self.close_settled(mint, result),
            MonitorCommand::Positions { reply } => {
                let _ = reply.send(self.positions.keys().copied().collect());
            }
            MonitorCommand::PendingCloses { reply } => {
                let _ = reply.send(self.closes.keys().copied().collect());
            }
            MonitorCommand::Shutdown => {
                for handle in self.positions.values() {
                    handle.send(PositionEvent::Shutdown);
                }
                self.positions.clear();
                return false;
            }
        }
        true
    }

    fn track(&mut self, keys: Arc<PoolKeys>, entry_sol: f64) {
        let mint = keys.token_mint();
        if self.positions.contains_key(&mint) || !self.pending.insert(mint) {
            debug!("{} already tracked", mint);
            return;
        }

        let ctx = self.ctx.clone();
        let monitor = self.handle.clone();
        tokio::spawn(async move {
            if let Err(e) = spawn_position(ctx, keys, entry_sol, monitor.clone()).await {
                error!("Failed to start tracking {}: {}", mint, e);
                monitor.init_failed(mint);
            }
        });
    }

    // Backstop for positions whose notifications went quiet.
    fn sweep(&mut self) {
        self.positions
            .retain(|mint, handle| {
                let alive = handle.send(PositionEvent::Sweep);
                if !alive {
                    warn!("Dropping dead position task for {}", mint);
                }
                alive
            });

        for (mint, pending) in &self.closes {
            if !self.closing.insert(*mint) {
                continue;
            }
            let ctx = self.ctx.clone();
            let monitor = self.handle.clone();
            let (mint, pending) = (*mint, pending.clone());
            tokio::spawn(async move {
                let result = reclose(&ctx, &pending).await.map_err(|e| e.to_string());
                monitor.close_settled(mint, result);
            });
        }
    }

    fn close_settled(&mut self, mint: Pubkey, result: Result<CloseOutcome, String>) {
        self.closing.remove(&mint);
        match result {
            Ok(CloseOutcome::Closed) | Ok(CloseOutcome::Gone) => {
                if let Some(pending) = self.closes.remove(&mint) {
                    info!("Token account {} for {} closed", pending.account, mint);
                }
            }
            Ok(CloseOutcome::Refilled) => {
                if let Some(pending) = self.closes.remove(&mint) {
                    info!("{} holds a balance again, tracking it", pending.account);
                    self.track(pending.keys, pending.entry_sol);
                }
            }
            Err(e) => {
                let Some(pending) = self.closes.get_mut(&mint) else { return };
                pending.rounds_left = pending.rounds_left.saturating_sub(1);
                warn!(
                    "Close of {} failed again ({} rounds left): {}",
                    pending.account, pending.rounds_left, e
                );
                if pending.rounds_left == 0 {
                    warn!("Giving up on closing {}; left for startup enumeration", pending.account);
                    self.closes.remove(&mint);
                }
            }
        }
    }
}

/// Re-reads the account and closes it again, burning whatever dust is left.
async fn reclose(ctx: &PositionContext, pending: &PendingClose) -> SniperResult<CloseOutcome> {
    let mint = pending.keys.token_mint();
    let data = ctx.executor.ledger().get_account_data(&pending.account).await?;
    let Some(balance) = data.as_deref().map(token_balance_update).transpose()?.flatten() else {
        return Ok(CloseOutcome::Gone);
    };
    if balance > 0 && to_ui_amount(balance, pending.keys.token_decimals()) >= ctx.settings.dust_threshold {
        return Ok(CloseOutcome::Refilled);
    }
    let burn = (balance > 0).then_some(balance);
    ctx.executor
        .close_token_account(&pending.account, &mint, burn, ctx.settings.close_max_attempts)
        .await?;
    Ok(CloseOutcome::Closed)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub closed: usize,
    pub tracked: usize,
    pub skipped: usize,
}

/// Walks the wallet's token accounts: empty ones are closed, venue mints
/// with a balance are handed to the monitor.
pub async fn enumerate_existing(
    ctx: &PositionContext,
    resolver: &PoolKeyResolver,
    monitor: &MonitorHandle,
    entry_sol: f64,
) -> SniperResult<StartupReport> {
    let ledger = ctx.executor.ledger();
    let owner = ctx.executor.wallet().get_public_key();
    let filters = vec![
        AccountFilter::DataSize(TOKEN_ACCOUNT_LEN as u64),
        AccountFilter::Memcmp {
            offset: TOKEN_ACCOUNT_OWNER_OFFSET,
            bytes: owner.to_bytes().to_vec(),
        },
    ];
    let accounts = ledger.get_program_accounts(&spl_token::id(), filters).await?;
    info!("Found {} token accounts for {}", accounts.len(), owner);

    let mut report = StartupReport::default();
    for (address, data) in accounts {
        let account = match decode_token_account(&data) {
            Ok(account) => account,
            Err(e) => {
                warn!("Skipping undecodable token account {}: {}", address, e);
                report.skipped += 1;
                continue;
            }
        };

        if account.amount == 0 {
            match ctx
                .executor
                .close_token_account(&address, &account.mint, None, ctx.settings.close_max_attempts)
                .await
            {
                Ok(_) => report.closed += 1,
                Err(e) => warn!("Failed to close empty account {}: {}", address, e),
            }
            continue;
        }

        if !is_venue_mint(&account.mint) {
            report.skipped += 1;
            continue;
        }
        match resolver.resolve(&account.mint).await {
            Ok(keys) => {
                monitor.track(keys, entry_sol);
                report.tracked += 1;
            }
            Err(e) => {
                warn!("No pool for held token {}: {}", account.mint, e);
                report.skipped += 1;
            }
        }
    }
    info!(
        "Startup: closed {} empty accounts, tracking {}, skipped {}",
        report.closed, report.tracked, report.skipped
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pool::sample_pool_keys;
    use crate::models::VaultSide;
    use crate::solana::token::encode_token_account;
    use crate::trading::position::tests::{wait_for, Harness};
    use crate::trading::position::PositionSettings;
    use std::str::FromStr;

    const PUMP_MINT: &str = "DjyQLzCR9hjDDbWWFDbBRhAEGCgeYyQsugHnTU5kpump";

    async fn tracked(handle: &MonitorHandle) -> Vec<Pubkey> {
        handle.positions().await.unwrap()
    }

    #[tokio::test]
    async fn zero_balance_position_is_removed_and_unsubscribed() {
        let harness = Harness::new(Some(5_000_000));
        let (monitor, handle) = PositionMonitor::new(harness.ctx.clone(), Duration::from_secs(60));
        tokio::spawn(monitor.run());

        let mint = harness.keys.token_mint();
        let mut released = handle.subscribe_released();
        assert!(handle.track(harness.keys.clone(), 1.0));
        // Duplicate requests while pending or active are ignored
        assert!(handle.track(harness.keys.clone(), 1.0));
        for _ in 0..200 {
            if tracked(&handle).await == vec![mint] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(tracked(&handle).await, vec![mint]);
        assert_eq!(harness.ledger.live_account_subscriptions(), 3);

        harness.set_balance(0);
        for _ in 0..200 {
            if tracked(&handle).await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(tracked(&handle).await.is_empty());
        assert_eq!(harness.ledger.live_account_subscriptions(), 0);
        assert!(!harness.ledger.is_subscribed(&harness.keys.vault(VaultSide::Quote)));
        assert_eq!(released.recv().await.unwrap(), mint);
    }

    fn failing_close_harness(rounds: u32) -> Harness {
        let settings = PositionSettings {
            close_max_attempts: 1,
            close_rearm_rounds: rounds,
            ..PositionSettings::default()
        };
        let harness = Harness::with_settings(Some(0), settings);
        harness.ledger.fail_transactions("custom program error: 0x1");
        harness
    }

    #[tokio::test(start_paused = true)]
    async fn failed_close_is_reattempted_on_following_sweeps() {
        let harness = failing_close_harness(2);
        let (monitor, handle) = PositionMonitor::new(harness.ctx.clone(), Duration::from_millis(100));
        tokio::spawn(monitor.run());
        handle.track(harness.keys.clone(), 1.0);

        // The position's own close, then one per re-armed round
        wait_for(|| harness.ledger.sent_count() == 3).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(harness.ledger.sent_count(), 3);
        assert!(handle.pending_closes().await.unwrap().is_empty());
        assert!(tracked(&handle).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn account_closed_elsewhere_ends_close_retries() {
        let harness = failing_close_harness(5);
        let (monitor, handle) = PositionMonitor::new(harness.ctx.clone(), Duration::from_secs(60));
        tokio::spawn(monitor.run());
        handle.track(harness.keys.clone(), 1.0);

        let mint = harness.keys.token_mint();
        for _ in 0..200 {
            if handle.pending_closes().await.unwrap() == vec![mint] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handle.pending_closes().await.unwrap(), vec![mint]);
        assert_eq!(harness.ledger.sent_count(), 1);

        harness.ledger.set_account(harness.token_account, Vec::new());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(handle.pending_closes().await.unwrap().is_empty());
        assert_eq!(harness.ledger.sent_count(), 1);
    }

    #[tokio::test]
    async fn sweep_evaluates_without_notifications() {
        let harness = Harness::new(Some(1_000_000));
        let (monitor, handle) = PositionMonitor::new(harness.ctx.clone(), Duration::from_millis(20));
        tokio::spawn(monitor.run());
        handle.track(harness.keys.clone(), 1.0);

        // Price falls on-chain but no notification is delivered
        harness.ledger.set_account(
            harness.keys.vault(VaultSide::Quote),
            encode_token_account(&spl_token::native_mint::id(), &harness.keys.authority, 500_000_000_000),
        );
        wait_for(|| harness.ledger.sent_count() >= 1).await;
        handle.shutdown();
    }

    #[tokio::test]
    async fn startup_closes_empty_and_tracks_venue_tokens() {
        let harness = Harness::new(None);
        let wallet = harness.ctx.executor.wallet().get_public_key();
        let pump_mint = Pubkey::from_str(PUMP_MINT).unwrap();
        let resolver = PoolKeyResolver::new(harness.ledger.clone());
        resolver.seed(sample_pool_keys(pump_mint, true)).await;

        let token_program = spl_token::id();
        harness.ledger.set_program_account(
            token_program,
            Pubkey::new_unique(),
            encode_token_account(&Pubkey::new_unique(), &wallet, 0),
        );
        harness.ledger.set_program_account(
            token_program,
            Pubkey::new_unique(),
            encode_token_account(&pump_mint, &wallet, 42_000_000),
        );
        harness.ledger.set_program_account(
            token_program,
            Pubkey::new_unique(),
            encode_token_account(&Pubkey::new_unique(), &wallet, 7),
        );
        // Someone else's account
        harness.ledger.set_program_account(
            token_program,
            Pubkey::new_unique(),
            encode_token_account(&pump_mint, &Pubkey::new_unique(), 0),
        );

        let (tx, mut commands) = mpsc::unbounded_channel();
        let handle = MonitorHandle::from_sender(tx);
        let report = enumerate_existing(&harness.ctx, &resolver, &handle, 0.1)
            .await
            .unwrap();

        assert_eq!(report, StartupReport { closed: 1, tracked: 1, skipped: 1 });
        assert_eq!(harness.ledger.sent_count(), 1);
        match commands.recv().await {
            Some(MonitorCommand::Track { keys, entry_sol }) => {
                assert_eq!(keys.token_mint(), pump_mint);
                assert_eq!(entry_sol, 0.1);
            }
            _ => panic!("expected track command"),
        }
    }
}
