use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::SniperResult;
use crate::models::{PoolKeys, VaultSide};
use crate::solana::ledger::{Subscription, SubscriptionHandle};
use crate::solana::token::{decode_token_amount, to_ui_amount, token_balance_update};
use crate::trading::exit_rules::{ExitDecision, ExitReason, ExitRules, ExitState};
use crate::trading::monitor::{MonitorHandle, PendingClose};
use crate::trading::orders::{Direction, OrderExecutor, OrderRequest};
use crate::trading::price::PriceResolver;
use crate::trading::vault_cache::VaultCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Uninitialized,
    Active,
    Closing, // Full sell or account close in progress
    Closed,
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::Active => write!(f, "Active"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Everything a position task reacts to, in arrival order.
#[derive(Debug)]
pub enum PositionEvent {
    Vault { side: VaultSide, data: Vec<u8> },
    TokenAccount { data: Vec<u8> },
    Sweep,
    OrderSettled { tag: Uuid, result: Result<Signature, String> },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct PositionSettings {
    pub slippage_pct: f64,
    pub sell_max_attempts: u32,
    pub close_max_attempts: u32,
    pub close_rearm_rounds: u32, // Sweeps that re-attempt a failed close
    pub dust_threshold: f64,     // Decimal token units
}

impl Default for PositionSettings {
    fn default() -> Self {
        Self {
            slippage_pct: 25.0,
            sell_max_attempts: 1,
            close_max_attempts: 3,
            close_rearm_rounds: 5,
            dust_threshold: 0.00005,
        }
    }
}

/// Shared collaborators of every position task.
pub struct PositionContext {
    pub executor: Arc<OrderExecutor>,
    pub prices: Arc<PriceResolver>,
    pub rules: ExitRules,
    pub settings: PositionSettings,
}

/// Sender side of a running position task.
#[derive(Debug, Clone)]
pub struct PositionHandle {
    pub mint: Pubkey,
    events: mpsc::UnboundedSender<PositionEvent>,
}

impl PositionHandle {
    /// False once the task has exited.
    pub fn send(&self, event: PositionEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    tag: Uuid,
    full: bool,
    levels: Vec<usize>, // Released again if the order fails
}

struct TokenPosition {
    mint: Pubkey,
    keys: Arc<PoolKeys>,
    entry_sol: f64,
    token_account: Pubkey,
    account_exists: bool,
    cache: VaultCache,
    exit: ExitState,
    state: PositionState,
    in_flight: Option<InFlight>,
    handles: Vec<SubscriptionHandle>,
    ctx: Arc<PositionContext>,
    monitor: MonitorHandle,
    events_tx: mpsc::UnboundedSender<PositionEvent>,
}

// Forwards one subscription onto the position's queue.
fn forward<T, F>(
    subscription: Subscription<T>,
    events: mpsc::UnboundedSender<PositionEvent>,
    wrap: F,
) -> SubscriptionHandle
where
    T: Send + 'static,
    F: Fn(T) -> PositionEvent + Send + 'static,
{
    let (mut updates, handle) = subscription.into_parts();
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            if events.send(wrap(update)).is_err() {
                break;
            }
        }
    });
    handle
}

/// Subscribes to both vaults and the owned token account, loads the balance
/// and starts the position task. The task reports itself to the monitor
/// before handling any event.
pub async fn spawn_position(
    ctx: Arc<PositionContext>,
    keys: Arc<PoolKeys>,
    entry_sol: f64,
    monitor: MonitorHandle,
) -> SniperResult<()> {
    let mint = keys.token_mint();
    let ledger = ctx.executor.ledger();
    let token_account = ctx.executor.wallet().associated_token_account(&mint);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let mut handles = Vec::with_capacity(3);
    for side in [VaultSide::Quote, VaultSide::Base] {
        let subscription = ledger.subscribe_account(&keys.vault(side)).await?;
        handles.push(forward(subscription, events_tx.clone(), move |data| {
            PositionEvent::Vault { side, data }
        }));
    }
    let subscription = ledger.subscribe_account(&token_account).await?;
    handles.push(forward(subscription, events_tx.clone(), |data| {
        PositionEvent::TokenAccount { data }
    }));

    let initial = ledger.get_account_data(&token_account).await?;
    let mut cache = VaultCache::new();
    let account_exists = match initial.as_deref().map(token_balance_update).transpose()?.flatten() {
        Some(raw) => {
            cache.set_owned_balance(raw);
            true
        }
        None => false,
    };

    let position = TokenPosition {
        mint,
        keys,
        entry_sol,
        token_account,
        account_exists,
        cache,
        exit: ExitState::default(),
        state: PositionState::Uninitialized,
        in_flight: None,
        handles,
        ctx,
        monitor,
        events_tx,
    };
    tokio::spawn(position.run(events_rx));
    Ok(())
}

impl TokenPosition {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<PositionEvent>) {
        let handle = PositionHandle {
            mint: self.mint,
            events: self.events_tx.clone(),
        };
        if !self.monitor.activated(handle) {
            warn!("Monitor gone before {} activated", self.mint);
            self.release_subscriptions();
            return;
        }
        self.state = PositionState::Active;
        info!(
            "Tracking {} (balance {}, entry {} SOL, token account {})",
            self.mint,
            self.cache.owned_balance(),
            self.entry_sol,
            self.token_account
        );

        self.check_balance().await;
        while self.state != PositionState::Closed {
            let Some(event) = events.recv().await else { break };
            match event {
                PositionEvent::Vault { side, data } => {
                    match decode_token_amount(&data) {
                        Ok(raw) => self.cache.update(side, raw, self.keys.decimals(side)),
                        Err(e) => warn!("Bad {} vault update for {}: {}", side, self.mint, e),
                    }
                    if side == VaultSide::Quote {
                        self.evaluate().await;
                    }
                }
                PositionEvent::TokenAccount { data } => match token_balance_update(&data) {
                    Ok(Some(raw)) => {
                        self.account_exists = true;
                        self.cache.set_owned_balance(raw);
                        self.check_balance().await;
                    }
                    Ok(None) => {
                        info!("Token account for {} was closed", self.mint);
                        self.account_gone();
                        self.check_balance().await;
                    }
                    Err(e) => warn!("Bad token account update for {}: {}", self.mint, e),
                },
                PositionEvent::Sweep => self.evaluate().await,
                PositionEvent::OrderSettled { tag, result } => self.order_settled(tag, result).await,
                PositionEvent::Shutdown => {
                    debug!("Shutting down position {}", self.mint);
                    self.release_subscriptions();
                    self.state = PositionState::Closed;
                }
            }
        }
        debug!("Position task for {} exited", self.mint);
    }

    fn account_gone(&mut self) {
        self.account_exists = false;
        self.cache.set_owned_balance(0);
    }

    fn release_subscriptions(&mut self) {
        for handle in self.handles.iter_mut() {
            handle.close();
        }
        self.handles.clear();
    }

    /// Closes the position when the balance is zero or dust. Returns true if it did.
    async fn check_balance(&mut self) -> bool {
        let balance = self.cache.owned_balance();
        if balance == 0 {
            info!("Balance of {} is zero, closing position", self.mint);
            self.close(None).await;
            return true;
        }
        let ui_balance = to_ui_amount(balance, self.keys.token_decimals());
        if ui_balance < self.ctx.settings.dust_threshold {
            info!("Balance of {} is dust ({}), burning and closing", self.mint, ui_balance);
            self.close(Some(balance)).await;
            return true;
        }
        false
    }

    async fn close(&mut self, burn_amount: Option<u64>) {
        self.state = PositionState::Closing;
        self.release_subscriptions();
        self.monitor.remove(self.mint);

        if self.account_exists {
            let attempts = self.ctx.settings.close_max_attempts;
            if let Err(e) = self
                .ctx
                .executor
                .close_token_account(&self.token_account, &self.mint, burn_amount, attempts)
                .await
            {
                error!("Failed to close token account for {}: {}", self.mint, e);
                self.monitor.retry_close(PendingClose {
                    keys: self.keys.clone(),
                    entry_sol: self.entry_sol,
                    account: self.token_account,
                    rounds_left: self.ctx.settings.close_rearm_rounds,
                });
            }
        }
        self.state = PositionState::Closed;
        info!("Position {} closed", self.mint);
    }

    async fn evaluate(&mut self) {
        if self.state != PositionState::Active {
            return;
        }
        if let Some(in_flight) = &self.in_flight {
            debug!("Order {} in flight for {}, deferring evaluation", in_flight.tag, self.mint);
            return;
        }
        if self.check_balance().await {
            return;
        }

        let Some(price) = self.ctx.prices.get_price(&self.keys, &mut self.cache).await else {
            debug!("No price for {} this tick", self.mint);
            return;
        };
        let balance = self.cache.owned_balance();
        let value = to_ui_amount(balance, self.keys.token_decimals()) * price;
        debug!("{} value {:.6} SOL (entry {} SOL)", self.mint, value, self.entry_sol);

        let decision = self
            .ctx
            .rules
            .evaluate(&mut self.exit, value, self.entry_sol, balance);
        if !decision.is_empty() {
            self.dispatch_sell(decision);
        }
    }

    fn dispatch_sell(&mut self, decision: ExitDecision) {
        let reasons: Vec<String> = decision.actions.iter().map(|a| a.reason.to_string()).collect();
        let levels = decision
            .actions
            .iter()
            .filter_map(|a| match a.reason {
                ExitReason::Level { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        let tag = Uuid::new_v4();
        info!(
            "Selling {} of {} for {} [{}] (order {})",
            decision.total,
            self.mint,
            reasons.join(", "),
            if decision.full { "full" } else { "partial" },
            tag
        );

        self.in_flight = Some(InFlight {
            tag,
            full: decision.full,
            levels,
        });
        if decision.full {
            self.state = PositionState::Closing;
        }

        let request = OrderRequest {
            direction: Direction::Sell,
            amount: decision.total,
            slippage_pct: self.ctx.settings.slippage_pct,
            fee: None,
            max_attempts: self.ctx.settings.sell_max_attempts,
        };
        let executor = self.ctx.executor.clone();
        let keys = self.keys.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = executor.submit(&keys, &request).await.map_err(|e| e.to_string());
            let _ = events.send(PositionEvent::OrderSettled { tag, result });
        });
    }

    async fn order_settled(&mut self, tag: Uuid, result: Result<Signature, String>) {
        let in_flight = match self.in_flight.take() {
            Some(in_flight) if in_flight.tag == tag => in_flight,
            other => {
                self.in_flight = other;
                warn!("Ignoring settlement of unknown order {} for {}", tag, self.mint);
                return;
            }
        };

        match result {
            Ok(signature) => {
                info!("Sell for {} confirmed: {}", self.mint, signature);
                // Pick up the post-swap balance without waiting for a notification
                let ledger = self.ctx.executor.ledger();
                match ledger.get_account_data(&self.token_account).await {
                    Ok(data) => match data.as_deref().map(token_balance_update).transpose() {
                        Ok(Some(Some(raw))) => self.cache.set_owned_balance(raw),
                        Ok(_) => self.account_gone(),
                        Err(e) => warn!("Bad token account for {}: {}", self.mint, e),
                    },
                    Err(e) => warn!("Balance refresh for {} failed: {}", self.mint, e),
                }
                if self.state == PositionState::Closing {
                    self.state = PositionState::Active;
                }
                self.check_balance().await;
            }
            Err(e) => {
                warn!("Sell for {} failed: {}", self.mint, e);
                for index in in_flight.levels {
                    self.exit.levels_taken.remove(&index);
                }
                if in_flight.full && self.state == PositionState::Closing {
                    self.state = PositionState::Active;
                }
            }
        }
    }
}
