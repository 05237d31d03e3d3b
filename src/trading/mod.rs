pub mod exit_rules;
pub mod filters;
pub mod holders;
pub mod monitor;
pub mod orders;
pub mod position;
pub mod price;
pub mod retry;
pub mod signal;
pub mod sniper;
pub mod swap_math;
pub mod vault_cache;

use solana_sdk::pubkey::Pubkey;

pub use exit_rules::{ExitRules, SellLevel};
pub use filters::{FilterArgs, FilterGate, PoolFilters};
pub use monitor::{MonitorHandle, PositionMonitor};
pub use orders::{OrderConfig, OrderExecutor};
pub use position::{PositionContext, PositionSettings};
pub use price::PriceResolver;
pub use sniper::{ListingSniper, SnipeSettings};

/// Launchpad mints are vanity-ground to end with this suffix.
pub const VENUE_MINT_SUFFIX: &str = "pump";

pub fn is_venue_mint(mint: &Pubkey) -> bool {
    mint.to_string().ends_with(VENUE_MINT_SUFFIX)
}
