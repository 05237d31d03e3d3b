use solana_sdk::{instruction::Instruction, pubkey::Pubkey, signature::Signature};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::error::{SniperError, SniperResult};
use crate::models::{PoolKeys, VaultSide};
use crate::solana::ledger::{LedgerClient, TxStatus};
use crate::solana::raydium::{
    close_token_account_instructions, compute_budget_instructions, create_ata_idempotent, swap_base_in,
};
use crate::solana::token::TOKEN_ACCOUNT_RENT_LAMPORTS;
use crate::solana::wallet::WalletManager;
use crate::trading::price::fetch_reserves;
use crate::trading::retry::{retry_fixed, RetryPolicy};
use crate::trading::swap_math::SwapMath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Buy,
    Sell,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub direction: Direction,
    pub amount: u64,         // Lamports for buys, raw token units for sells
    pub slippage_pct: f64,
    pub fee: Option<u64>,    // Explicit micro-lamports per CU, still clamped to max_fee
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct OrderConfig {
    pub max_fee: u64,
    pub fallback_fee: u64,
    pub compute_unit_limit: u32,
    pub retry_interval: Duration,
    pub confirm_timeout: Duration,
    pub confirm_poll: Duration,
    pub skip_preflight: bool,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            max_fee: 650_000,
            fallback_fee: 50_000,
            compute_unit_limit: 100_000,
            retry_interval: Duration::from_millis(500),
            confirm_timeout: Duration::from_secs(30),
            confirm_poll: Duration::from_millis(500),
            skip_preflight: true,
        }
    }
}

/// Rounded-up summary of recent prioritization fees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeStats {
    pub avg: u64,
    pub median: u64,
    pub max: u64,
}

pub fn fee_stats(samples: &[u64]) -> Option<FeeStats> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();

    let total: u128 = sorted.iter().map(|f| *f as u128).sum();
    let avg = ((total + n as u128 - 1) / n as u128) as u64;
    let median = if n % 2 == 0 {
        let (a, b) = (sorted[n / 2 - 1] as u128, sorted[n / 2] as u128);
        ((a + b + 1) / 2) as u64
    } else {
        sorted[n / 2]
    };
    Some(FeeStats {
        avg,
        median,
        max: sorted[n - 1],
    })
}

/// Minimum native balance before a buy: rent for the new token account plus headroom.
pub fn min_buy_balance() -> u64 {
    TOKEN_ACCOUNT_RENT_LAMPORTS * 3 / 2
}

/// Builds, signs and submits swaps and account closes with bounded retries.
pub struct OrderExecutor {
    ledger: Arc<dyn LedgerClient>,
    wallet: WalletManager,
    math: Arc<dyn SwapMath>,
    config: OrderConfig,
}

impl OrderExecutor {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        wallet: WalletManager,
        math: Arc<dyn SwapMath>,
        config: OrderConfig,
    ) -> Self {
        Self {
            ledger,
            wallet,
            math,
            config,
        }
    }

    pub fn wallet(&self) -> &WalletManager {
        &self.wallet
    }

    pub fn ledger(&self) -> Arc<dyn LedgerClient> {
        self.ledger.clone()
    }

    fn retry_policy(&self, max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, self.config.retry_interval, self.config.confirm_timeout)
    }

    /// Priority fee for a swap on this pool: `min(avg, max_fee)` of recent
    /// fees on its writable accounts, or the fallback when there is no sample.
    pub async fn priority_fee(&self, keys: &PoolKeys, explicit: Option<u64>) -> u64 {
        if let Some(fee) = explicit {
            return fee.min(self.config.max_fee);
        }
        let samples = match self
            .ledger
            .get_recent_prioritization_fees(&keys.writable_accounts())
            .await
        {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Fee sample failed for pool {}: {}", keys.id, e);
                Vec::new()
            }
        };
        match fee_stats(&samples) {
            Some(stats) => {
                debug!(
                    "Pool {} fees avg={} median={} max={}",
                    keys.id, stats.avg, stats.median, stats.max
                );
                stats.avg.min(self.config.max_fee)
            }
            None => self.config.fallback_fee.min(self.config.max_fee),
        }
    }

    pub async fn submit(&self, keys: &PoolKeys, request: &OrderRequest) -> SniperResult<Signature> {
        let mint = keys.token_mint();
        if request.direction == Direction::Buy {
            self.ensure_buy_balance().await?;
        }
        let fee = self.priority_fee(keys, request.fee).await;
        let label = format!("{} {}", request.direction, mint);
        info!(
            "Submitting {} of {} for {} (fee {} µL/CU, slippage {}%)",
            request.direction, request.amount, mint, fee, request.slippage_pct
        );

        let signature = retry_fixed(&self.retry_policy(request.max_attempts), &label, |attempt| {
            self.swap_attempt(keys, request, fee, attempt)
        })
        .await?;

        info!("{} confirmed: {}", label, signature);
        Ok(signature)
    }

    async fn ensure_buy_balance(&self) -> SniperResult<()> {
        let owner = self.wallet.get_public_key();
        let balance = self.ledger.get_balance(&owner).await?;
        let required = min_buy_balance();
        if balance < required {
            return Err(SniperError::InsufficientBalance(format!(
                "{} has {} lamports, needs {}",
                owner, balance, required
            )));
        }
        Ok(())
    }

    async fn swap_attempt(
        &self,
        keys: &PoolKeys,
        request: &OrderRequest,
        fee: u64,
        attempt: u32,
    ) -> SniperResult<Signature> {
        let owner = self.wallet.get_public_key();
        let mint = keys.token_mint();
        let token_account = self.wallet.associated_token_account(&mint);
        let wsol_account = self.wallet.wsol_account();

        // Quote against reserves as they are now
        let (base_reserve, quote_reserve) = fetch_reserves(self.ledger.as_ref(), keys).await?;
        let (reserve_in, reserve_out, source, destination) = match request.direction {
            Direction::Buy => (quote_reserve, base_reserve, wsol_account, token_account),
            Direction::Sell => (base_reserve, quote_reserve, token_account, wsol_account),
        };
        let min_out = self
            .math
            .min_amount_out(request.amount, reserve_in, reserve_out, request.slippage_pct);

        let mut instructions: Vec<Instruction> =
            compute_budget_instructions(self.config.compute_unit_limit, fee).to_vec();
        if request.direction == Direction::Buy {
            instructions.push(create_ata_idempotent(&owner, &mint));
        }
        instructions.push(swap_base_in(keys, &source, &destination, &owner, request.amount, min_out));

        debug!(
            "Attempt {} for {}: in={} min_out={} (reserves {}/{})",
            attempt, mint, request.amount, min_out, reserve_in, reserve_out
        );
        self.send_and_confirm(&instructions).await
    }

    /// Closes a wallet-owned token account, burning `burn_amount` first when given.
    pub async fn close_token_account(
        &self,
        account: &Pubkey,
        mint: &Pubkey,
        burn_amount: Option<u64>,
        max_attempts: u32,
    ) -> SniperResult<Signature> {
        let owner = self.wallet.get_public_key();
        let instructions = close_token_account_instructions(account, mint, &owner, burn_amount)?;
        let label = format!("close {}", account);

        let signature = retry_fixed(&self.retry_policy(max_attempts), &label, |_| {
            self.send_and_confirm(&instructions)
        })
        .await?;
        info!("Closed token account {} for {}: {}", account, mint, signature);
        Ok(signature)
    }

    /// One attempt: fresh blockhash, sign, send, then poll until the cluster
    /// reports a result. The caller's deadline bounds the polling.
    async fn send_and_confirm(&self, instructions: &[Instruction]) -> SniperResult<Signature> {
        let blockhash = self.ledger.get_latest_blockhash().await?;
        let transaction = self.wallet.sign(instructions, blockhash)?;
        let signature = self
            .ledger
            .send_transaction(&transaction, self.config.skip_preflight)
            .await?;

        loop {
            match self.ledger.get_signature_status(&signature).await {
                Ok(Some(TxStatus::Confirmed)) => return Ok(signature),
                Ok(Some(TxStatus::Failed(err))) => {
                    return Err(SniperError::TransactionError(format!("{} failed: {}", signature, err)))
                }
                Ok(None) => debug!("Transaction {} not yet confirmed", signature),
                Err(e) => debug!("Status check for {} failed: {}", signature, e),
            }
            sleep(self.config.confirm_poll).await;
        }
    }
}
