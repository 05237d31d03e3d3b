use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::api::PriceQuotes;
use crate::error::{SniperError, SniperResult};
use crate::models::{PoolKeys, VaultSide};
use crate::solana::ledger::LedgerClient;
use crate::solana::token::decode_token_amount;
use crate::trading::vault_cache::VaultCache;

/// Raw `(base, quote)` vault reserves, read straight from the ledger.
pub async fn fetch_reserves(ledger: &dyn LedgerClient, keys: &PoolKeys) -> SniperResult<(u64, u64)> {
    let vaults = [keys.vault(VaultSide::Base), keys.vault(VaultSide::Quote)];
    let accounts = ledger.get_multiple_account_data(&vaults).await?;

    let mut amounts = [0u64; 2];
    for (i, (vault, data)) in vaults.iter().zip(accounts).enumerate() {
        let data = data.ok_or_else(|| SniperError::PoolNotFound(format!("vault {} missing", vault)))?;
        amounts[i] = decode_token_amount(&data)?;
    }
    Ok((amounts[0], amounts[1]))
}

fn ratio(base: f64, quote: f64) -> Option<f64> {
    if base > 0.0 {
        Some(quote / base)
    } else {
        None
    }
}

/// Token price in SOL, from cached vaults when fresh, otherwise from the ledger.
pub struct PriceResolver {
    ledger: Arc<dyn LedgerClient>,
    quotes: Option<Arc<dyn PriceQuotes>>,
    ttl: Duration,
}

impl PriceResolver {
    pub fn new(ledger: Arc<dyn LedgerClient>, quotes: Option<Arc<dyn PriceQuotes>>, ttl: Duration) -> Self {
        Self { ledger, quotes, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// `None` means "try again later"; failures are logged, never returned.
    pub async fn get_price(&self, keys: &PoolKeys, cache: &mut VaultCache) -> Option<f64> {
        if let Some((base, quote)) = cache.fresh_amounts(self.ttl) {
            return ratio(base, quote);
        }

        let mint = keys.token_mint();
        match self.cold_price(keys, cache).await {
            Ok(price) => return price,
            Err(e) => warn!("Vault price lookup failed for {}: {}", mint, e),
        }

        match self.quote_fallback(&mint).await {
            Ok(price) => {
                debug!("Using quoted price {} for {}", price, mint);
                Some(price)
            }
            Err(e) => {
                debug!("No quoted price for {}: {}", mint, e);
                None
            }
        }
    }

    async fn cold_price(&self, keys: &PoolKeys, cache: &mut VaultCache) -> SniperResult<Option<f64>> {
        let (base_raw, quote_raw) = fetch_reserves(self.ledger.as_ref(), keys).await?;
        cache.update(VaultSide::Base, base_raw, keys.decimals(VaultSide::Base));
        cache.update(VaultSide::Quote, quote_raw, keys.decimals(VaultSide::Quote));
        Ok(ratio(cache.amount(VaultSide::Base), cache.amount(VaultSide::Quote)))
    }

    async fn quote_fallback(&self, mint: &Pubkey) -> SniperResult<f64> {
        let quotes = self
            .quotes
            .as_ref()
            .ok_or_else(|| SniperError::PriceUnavailable(mint.to_string()))?;
        let token_usd = quotes.price_usd(mint).await?;
        let sol_usd = quotes.sol_price_usd().await?;
        if sol_usd <= 0.0 {
            return Err(SniperError::PriceUnavailable("SOL".to_string()));
        }
        Ok(token_usd / sol_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pool::sample_pool_keys;
    use crate::solana::ledger::mock::MockLedger;
    use crate::solana::token::encode_token_account;
    use async_trait::async_trait;

    struct FixedQuotes;

    #[async_trait]
    impl PriceQuotes for FixedQuotes {
        async fn price_usd(&self, _mint: &Pubkey) -> SniperResult<f64> {
            Ok(0.5)
        }
        async fn sol_price_usd(&self) -> SniperResult<f64> {
            Ok(200.0)
        }
    }

    fn set_vaults(ledger: &MockLedger, keys: &PoolKeys, base_raw: u64, quote_raw: u64) {
        let owner = keys.authority;
        ledger.set_account(
            keys.vault(VaultSide::Base),
            encode_token_account(&keys.token_mint(), &owner, base_raw),
        );
        ledger.set_account(
            keys.vault(VaultSide::Quote),
            encode_token_account(&spl_token::native_mint::id(), &owner, quote_raw),
        );
    }

    #[tokio::test]
    async fn fast_path_uses_fresh_cache_without_io() {
        let keys = sample_pool_keys(Pubkey::new_unique(), true);
        let resolver = PriceResolver::new(Arc::new(MockLedger::new()), None, Duration::from_secs(30));
        let mut cache = VaultCache::new();
        cache.update(VaultSide::Base, 4_000_000, 6);
        cache.update(VaultSide::Quote, 2_000_000_000, 9);

        assert_eq!(resolver.get_price(&keys, &mut cache).await, Some(0.5));
    }

    #[tokio::test]
    async fn cold_path_refreshes_cache() {
        let ledger = Arc::new(MockLedger::new());
        // Token on the quote side of the pool
        let keys = sample_pool_keys(Pubkey::new_unique(), false);
        set_vaults(&ledger, &keys, 10_000_000, 1_000_000_000);

        let resolver = PriceResolver::new(ledger, None, Duration::from_secs(30));
        let mut cache = VaultCache::new();
        assert_eq!(resolver.get_price(&keys, &mut cache).await, Some(0.1));
        assert_eq!(cache.amount(VaultSide::Base), 10.0);
        assert!(cache.fresh_amounts(Duration::from_secs(30)).is_some());
    }

    #[tokio::test]
    async fn zero_base_reserve_has_no_price() {
        let ledger = Arc::new(MockLedger::new());
        let keys = sample_pool_keys(Pubkey::new_unique(), true);
        set_vaults(&ledger, &keys, 0, 1_000_000_000);
        let resolver = PriceResolver::new(ledger, None, Duration::from_secs(30));
        assert_eq!(resolver.get_price(&keys, &mut VaultCache::new()).await, None);
    }

    #[tokio::test]
    async fn falls_back_to_quotes_when_vaults_missing() {
        let keys = sample_pool_keys(Pubkey::new_unique(), true);
        let ledger = Arc::new(MockLedger::new());

        let without = PriceResolver::new(ledger.clone(), None, Duration::from_secs(30));
        assert_eq!(without.get_price(&keys, &mut VaultCache::new()).await, None);

        let with = PriceResolver::new(ledger, Some(Arc::new(FixedQuotes)), Duration::from_secs(30));
        assert_eq!(with.get_price(&keys, &mut VaultCache::new()).await, Some(0.0025));
    }
}
