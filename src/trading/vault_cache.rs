use tokio::time::{Duration, Instant};

use crate::models::VaultSide;

#[derive(Debug, Clone, Copy, Default)]
struct VaultEntry {
    amount: f64,               // Reserve in decimal units
    updated_at: Option<Instant>, // None until the first update lands
}

impl VaultEntry {
    fn is_stale_at(&self, ttl: Duration, now: Instant) -> bool {
        match self.updated_at {
            Some(at) => now.saturating_duration_since(at) > ttl,
            None => true,
        }
    }
}

/// Latest known reserves of both pool sides plus the owned token balance.
/// Fed by account notifications, so readers must check staleness first.
#[derive(Debug, Clone, Default)]
pub struct VaultCache {
    base: VaultEntry,
    quote: VaultEntry,
    owned_balance: u64, // Raw token-account amount
}

impl VaultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, side: VaultSide, raw_amount: u64, decimals: u8) {
        self.update_at(side, raw_amount, decimals, Instant::now());
    }

    pub fn update_at(&mut self, side: VaultSide, raw_amount: u64, decimals: u8, now: Instant) {
        let entry = self.entry_mut(side);
        entry.amount = raw_amount as f64 / 10f64.powi(decimals as i32);
        entry.updated_at = Some(now);
    }

    pub fn amount(&self, side: VaultSide) -> f64 {
        self.entry(side).amount
    }

    pub fn is_stale(&self, side: VaultSide, ttl: Duration) -> bool {
        self.is_stale_at(side, ttl, Instant::now())
    }

    pub fn is_stale_at(&self, side: VaultSide, ttl: Duration, now: Instant) -> bool {
        self.entry(side).is_stale_at(ttl, now)
    }

    /// Both sides fresh: `(base, quote)` amounts.
    pub fn fresh_amounts(&self, ttl: Duration) -> Option<(f64, f64)> {
        let now = Instant::now();
        if self.is_stale_at(VaultSide::Base, ttl, now) || self.is_stale_at(VaultSide::Quote, ttl, now) {
            return None;
        }
        Some((self.base.amount, self.quote.amount))
    }

    pub fn owned_balance(&self) -> u64 {
        self.owned_balance
    }

    pub fn set_owned_balance(&mut self, raw: u64) {
        self.owned_balance = raw;
    }

    fn entry(&self, side: VaultSide) -> &VaultEntry {
        match side {
            VaultSide::Base => &self.base,
            VaultSide::Quote => &self.quote,
        }
    }

    fn entry_mut(&mut self, side: VaultSide) -> &mut VaultEntry {
        match side {
            VaultSide::Base => &mut self.base,
            VaultSide::Quote => &mut self.quote,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_updated_is_stale() {
        let cache = VaultCache::new();
        assert!(cache.is_stale_at(VaultSide::Base, Duration::from_secs(60), Instant::now()));
        assert!(cache.fresh_amounts(Duration::from_secs(60)).is_none());
    }

    #[test]
    fn stale_only_after_ttl_elapses() {
        let mut cache = VaultCache::new();
        let t0 = Instant::now();
        let ttl = Duration::from_secs(5);
        cache.update_at(VaultSide::Quote, 2_500_000_000, 9, t0);

        assert_eq!(cache.amount(VaultSide::Quote), 2.5);
        assert!(!cache.is_stale_at(VaultSide::Quote, ttl, t0 + Duration::from_secs(5)));
        assert!(cache.is_stale_at(VaultSide::Quote, ttl, t0 + Duration::from_millis(5_001)));
        // Sides age independently
        assert!(cache.is_stale_at(VaultSide::Base, ttl, t0));
    }

    #[test]
    fn fresh_amounts_needs_both_sides() {
        let mut cache = VaultCache::new();
        cache.update(VaultSide::Base, 1_000_000, 6);
        assert!(cache.fresh_amounts(Duration::from_secs(30)).is_none());
        cache.update(VaultSide::Quote, 3_000_000_000, 9);
        assert_eq!(cache.fresh_amounts(Duration::from_secs(30)), Some((1.0, 3.0)));
    }
}
