use async_trait::async_trait;
use solana_sdk::native_token::lamports_to_sol;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::debug;

use crate::error::SniperResult;
use crate::models::{PoolKeys, VaultSide};
use crate::solana::ledger::{AccountFilter, LargestAccount, LedgerClient};
use crate::solana::token::{decode_token_account, TOKEN_ACCOUNT_LEN, TOKEN_ACCOUNT_OWNER_OFFSET};
use crate::trading::filters::{FilterResult, PoolFilter};

/// A large holder's token account and its share of supply.
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub account: LargestAccount,
    pub share_pct: f64,
}

/// Who stands behind a large holding.
#[derive(Debug, Clone, PartialEq)]
pub struct HolderReport {
    pub holding: Holding,
    pub owner: Pubkey,
    pub sol_balance: f64,
    pub token_accounts: usize,
}

/// The pool's own vaults hold liquidity, not a position.
pub fn pool_vaults(keys: &PoolKeys) -> [Pubkey; 2] {
    [keys.vault(VaultSide::Base), keys.vault(VaultSide::Quote)]
}

/// Largest token accounts of `mint` outside `exclude`, biggest first.
/// A zero supply reports every holding as 100%.
pub async fn largest_holdings(
    ledger: &dyn LedgerClient,
    mint: &Pubkey,
    exclude: &[Pubkey],
    limit: usize,
) -> SniperResult<Vec<Holding>> {
    let supply = ledger.get_token_supply(mint).await?;
    let accounts = ledger.get_token_largest_accounts(mint).await?;
    Ok(accounts
        .into_iter()
        .filter(|account| !exclude.contains(&account.address))
        .take(limit)
        .map(|account| {
            let share_pct = if supply > 0.0 {
                account.ui_amount / supply * 100.0
            } else {
                100.0
            };
            Holding { account, share_pct }
        })
        .collect())
}

/// Resolves each holding's owner, their SOL balance and how many token
/// accounts they keep.
pub async fn holder_reports(ledger: &dyn LedgerClient, holdings: Vec<Holding>) -> SniperResult<Vec<HolderReport>> {
    let mut reports = Vec::with_capacity(holdings.len());
    for holding in holdings {
        let Some(data) = ledger.get_account_data(&holding.account.address).await? else {
            debug!("Holder account {} vanished", holding.account.address);
            continue;
        };
        let owner = decode_token_account(&data)?.owner;
        let sol_balance = lamports_to_sol(ledger.get_balance(&owner).await?);
        let filters = vec![
            AccountFilter::DataSize(TOKEN_ACCOUNT_LEN as u64),
            AccountFilter::Memcmp {
                offset: TOKEN_ACCOUNT_OWNER_OFFSET,
                bytes: owner.to_bytes().to_vec(),
            },
        ];
        let token_accounts = ledger.count_program_accounts(&spl_token::id(), filters).await?;
        reports.push(HolderReport {
            holding,
            owner,
            sol_balance,
            token_accounts,
        });
    }
    Ok(reports)
}

/// No single holder outside the pool owns more than `max_share_pct` of supply.
pub struct TopHolderFilter {
    ledger: Arc<dyn LedgerClient>,
    max_share_pct: f64,
}

impl TopHolderFilter {
    pub fn new(ledger: Arc<dyn LedgerClient>, max_share_pct: f64) -> Self {
        Self { ledger, max_share_pct }
    }
}

#[async_trait]
impl PoolFilter for TopHolderFilter {
    fn name(&self) -> &'static str {
        "topholder"
    }

    async fn execute(&self, keys: &PoolKeys) -> SniperResult<FilterResult> {
        let mint = keys.token_mint();
        let holdings = largest_holdings(self.ledger.as_ref(), &mint, &pool_vaults(keys), 1).await?;
        match holdings.first() {
            Some(top) if top.share_pct > self.max_share_pct => Ok(FilterResult::fail(format!(
                "top holder -> {} holds {:.2}% > {}%",
                top.account.address, top.share_pct, self.max_share_pct
            ))),
            _ => Ok(FilterResult::pass()),
        }
    }
}
