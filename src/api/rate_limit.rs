use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

pub type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Shared limiter allowing `requests` per minute. Zero is treated as one.
pub fn per_minute(requests: u32) -> Arc<DirectLimiter> {
    let requests = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_minute(requests)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_matches_quota() {
        let limiter = per_minute(3);
        assert!((0..3).all(|_| limiter.check().is_ok()));
        assert!(limiter.check().is_err());
    }
}
