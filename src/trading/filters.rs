use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

use crate::api::dexscreener::DexInterval;
use crate::api::{PairStats, PriceQuotes};
use crate::error::SniperResult;
use crate::models::PoolKeys;
use crate::solana::ledger::{AccountFilter, LedgerClient};
use crate::solana::token::TOKEN_ACCOUNT_LEN;
use crate::trading::holders::TopHolderFilter;
use crate::trading::is_venue_mint;

#[derive(Debug, Clone, PartialEq)]
pub struct FilterResult {
    pub ok: bool,
    pub message: Option<String>,
}

impl FilterResult {
    pub fn pass() -> Self {
        Self {
            ok: true,
            message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }
}

#[async_trait]
pub trait PoolFilter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, keys: &PoolKeys) -> SniperResult<FilterResult>;
}

// ============================================================================
// Filters
// ============================================================================

/// Either side of the pool is a launchpad mint.
pub struct PumpVenueFilter;

#[async_trait]
impl PoolFilter for PumpVenueFilter {
    fn name(&self) -> &'static str {
        "venue"
    }

    async fn execute(&self, keys: &PoolKeys) -> SniperResult<FilterResult> {
        if is_venue_mint(&keys.base_mint) || is_venue_mint(&keys.quote_mint) {
            Ok(FilterResult::pass())
        } else {
            Ok(FilterResult::fail("venue -> not a pump mint"))
        }
    }
}

/// Supply × USD price within `[min, max]`; a zero bound is not enforced.
pub struct MarketCapFilter {
    ledger: Arc<dyn LedgerClient>,
    quotes: Arc<dyn PriceQuotes>,
    min_market_cap: f64,
    max_market_cap: f64,
}

impl MarketCapFilter {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        quotes: Arc<dyn PriceQuotes>,
        min_market_cap: f64,
        max_market_cap: f64,
    ) -> Self {
        Self {
            ledger,
            quotes,
            min_market_cap,
            max_market_cap,
        }
    }
}

#[async_trait]
impl PoolFilter for MarketCapFilter {
    fn name(&self) -> &'static str {
        "marketcap"
    }

    async fn execute(&self, keys: &PoolKeys) -> SniperResult<FilterResult> {
        let mint = keys.token_mint();
        let supply = self.ledger.get_token_supply(&mint).await?;
        let price = self.quotes.price_usd(&mint).await?;
        let market_cap = supply * price;

        if self.max_market_cap != 0.0 && market_cap > self.max_market_cap {
            return Ok(FilterResult::fail(format!(
                "marketcap -> mkt cap {} > {}",
                market_cap, self.max_market_cap
            )));
        }
        if self.min_market_cap != 0.0 && market_cap < self.min_market_cap {
            return Ok(FilterResult::fail(format!(
                "marketcap -> mkt cap {} < {}",
                market_cap, self.min_market_cap
            )));
        }
        Ok(FilterResult::pass())
    }
}

/// At least `min_holders` token accounts exist for the mint.
pub struct HolderCountFilter {
    ledger: Arc<dyn LedgerClient>,
    min_holders: u64,
}

impl HolderCountFilter {
    pub fn new(ledger: Arc<dyn LedgerClient>, min_holders: u64) -> Self {
        Self { ledger, min_holders }
    }
}

#[async_trait]
impl PoolFilter for HolderCountFilter {
    fn name(&self) -> &'static str {
        "holders"
    }

    async fn execute(&self, keys: &PoolKeys) -> SniperResult<FilterResult> {
        let mint = keys.token_mint();
        let filters = vec![
            AccountFilter::DataSize(TOKEN_ACCOUNT_LEN as u64),
            AccountFilter::Memcmp {
                offset: 0,
                bytes: mint.to_bytes().to_vec(),
            },
        ];
        let holders = self
            .ledger
            .count_program_accounts(&spl_token::id(), filters)
            .await? as u64;
        if holders < self.min_holders {
            return Ok(FilterResult::fail(format!(
                "holder count -> count {} < {}",
                holders, self.min_holders
            )));
        }
        Ok(FilterResult::pass())
    }
}

/// Volume and buy count over a dexscreener window.
pub struct DexDataFilter {
    pairs: Arc<dyn PairStats>,
    interval: DexInterval,
    min_volume: f64,
    min_buys: u64,
}

impl DexDataFilter {
    pub fn new(pairs: Arc<dyn PairStats>, interval: DexInterval, min_volume: f64, min_buys: u64) -> Self {
        Self {
            pairs,
            interval,
            min_volume,
            min_buys,
        }
    }
}

#[async_trait]
impl PoolFilter for DexDataFilter {
    fn name(&self) -> &'static str {
        "dexdata"
    }

    async fn execute(&self, keys: &PoolKeys) -> SniperResult<FilterResult> {
        let activity = self.pairs.pair_activity(&keys.id, self.interval).await?;
        if self.min_buys != 0 && activity.buys < self.min_buys {
            return Ok(FilterResult::fail(format!(
                "min buys -> {} < {} over {}",
                activity.buys, self.min_buys, self.interval
            )));
        }
        if self.min_volume != 0.0 && activity.volume < self.min_volume {
            return Ok(FilterResult::fail(format!(
                "min volume -> {} < {} over {}",
                activity.volume, self.min_volume, self.interval
            )));
        }
        Ok(FilterResult::pass())
    }
}

// ============================================================================
// Chain and temporal gate
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FilterArgs {
    pub min_market_cap: f64,
    pub max_market_cap: f64,
    pub min_holder_count: u64,
    pub max_top_holder_pct: f64,
    pub min_volume: f64,
    pub min_buys: u64,
    pub dex_interval: DexInterval,
}

impl Default for FilterArgs {
    fn default() -> Self {
        Self {
            min_market_cap: 0.0,
            max_market_cap: 0.0,
            min_holder_count: 70,
            max_top_holder_pct: 0.0,
            min_volume: 0.0,
            min_buys: 0,
            dex_interval: DexInterval::M5,
        }
    }
}

pub struct PoolFilters {
    filters: Vec<Arc<dyn PoolFilter>>,
}

impl PoolFilters {
    pub fn new(filters: Vec<Arc<dyn PoolFilter>>) -> Self {
        Self { filters }
    }

    /// Venue filter always; the others only when a threshold is set.
    pub fn from_args(
        args: &FilterArgs,
        ledger: Arc<dyn LedgerClient>,
        quotes: Arc<dyn PriceQuotes>,
        pairs: Arc<dyn PairStats>,
    ) -> Self {
        let mut filters: Vec<Arc<dyn PoolFilter>> = vec![Arc::new(PumpVenueFilter)];
        if args.min_market_cap != 0.0 || args.max_market_cap != 0.0 {
            filters.push(Arc::new(MarketCapFilter::new(
                ledger.clone(),
                quotes,
                args.min_market_cap,
                args.max_market_cap,
            )));
        }
        if args.min_holder_count != 0 {
            filters.push(Arc::new(HolderCountFilter::new(ledger.clone(), args.min_holder_count)));
        }
        if args.max_top_holder_pct != 0.0 {
            filters.push(Arc::new(TopHolderFilter::new(ledger, args.max_top_holder_pct)));
        }
        if args.min_volume != 0.0 || args.min_buys != 0 {
            filters.push(Arc::new(DexDataFilter::new(
                pairs,
                args.dex_interval,
                args.min_volume,
                args.min_buys,
            )));
        }
        Self { filters }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Runs every filter concurrently; passes iff all pass. Errors count as failures.
    pub async fn execute(&self, keys: &PoolKeys) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        let results = join_all(self.filters.iter().map(|f| f.execute(keys))).await;

        let mut pass = true;
        for (filter, result) in self.filters.iter().zip(results) {
            match result {
                Ok(r) if r.ok => {}
                Ok(r) => {
                    pass = false;
                    debug!(
                        "{}: {}",
                        keys.token_mint(),
                        r.message.unwrap_or_else(|| format!("{} failed", filter.name()))
                    );
                }
                Err(e) => {
                    pass = false;
                    debug!("{}: {} filter errored: {}", keys.token_mint(), filter.name(), e);
                }
            }
        }
        pass
    }
}

/// Requires `consecutive_match_count` passes in a row, polling every
/// `check_interval` for at most `check_duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterGate {
    pub check_interval: Duration,
    pub check_duration: Duration,
    pub consecutive_match_count: u32,
}

impl Default for FilterGate {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(1_000),
            check_duration: Duration::from_millis(60_000),
            consecutive_match_count: 1,
        }
    }
}

impl FilterGate {
    pub fn is_disabled(&self) -> bool {
        self.check_interval.is_zero() || self.check_duration.is_zero()
    }

    fn checks(&self) -> u128 {
        (self.check_duration.as_millis() / self.check_interval.as_millis().max(1)).max(1)
    }

    pub async fn wait_for_match(&self, filters: &PoolFilters, keys: &PoolKeys) -> bool {
        if self.is_disabled() {
            return true;
        }
        let mint = keys.token_mint();
        let total = self.checks();
        let needed = self.consecutive_match_count.max(1);
        let mut matches = 0u32;

        for check in 1..=total {
            let passed = filters.execute(keys).await;
            debug!("Filter check {}/{} for {}: {}", check, total, mint, passed);
            if passed {
                matches += 1;
                if matches >= needed {
                    info!("{} matched filters on check {}/{}", mint, check, total);
                    return true;
                }
            } else {
                matches = 0;
            }
            if check < total {
                sleep(self.check_interval).await;
            }
        }
        info!("{} never matched filters ({} checks)", mint, total);
        false
    }
}
