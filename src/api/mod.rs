pub mod birdeye;
pub mod dexscreener;
pub mod rate_limit;

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;

use crate::error::SniperResult;
use dexscreener::{DexInterval, PairActivity};

pub use birdeye::BirdeyeClient;
pub use dexscreener::DexscreenerClient;

/// USD quotes for the fallback valuation and the market-cap filter.
#[async_trait]
pub trait PriceQuotes: Send + Sync {
    async fn price_usd(&self, mint: &Pubkey) -> SniperResult<f64>;

    async fn sol_price_usd(&self) -> SniperResult<f64>;
}

/// Trading activity of a pool over a rolling window.
#[async_trait]
pub trait PairStats: Send + Sync {
    async fn pair_activity(&self, pair: &Pubkey, interval: DexInterval) -> SniperResult<PairActivity>;
}
