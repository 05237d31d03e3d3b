use std::future::Future;
use tokio::time::{sleep, timeout, Duration};
use tracing::warn;

use crate::error::{Disposition, SniperError, SniperResult};

/// Fixed-interval, bounded retry schedule. Every attempt runs under its own deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            attempt_timeout,
        }
    }

    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }
}

// A reverted transaction is worth another attempt; other Abandon/Fatal errors are not.
fn stops_early(error: &SniperError) -> bool {
    match error.disposition() {
        Disposition::Fatal => true,
        Disposition::Abandon => !matches!(error, SniperError::TransactionError(_)),
        Disposition::RetryLater => false,
    }
}

/// Runs `attempt(n)` for n = 1..=max_attempts, the first immediately and the
/// rest `interval` apart, until one succeeds. Exhaustion yields
/// `SniperError::RetriesExhausted`.
pub async fn retry_fixed<T, F, Fut>(policy: &RetryPolicy, label: &str, mut attempt: F) -> SniperResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = SniperResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for n in 1..=max_attempts {
        if n > 1 {
            sleep(policy.interval).await;
        }
        match timeout(policy.attempt_timeout, attempt(n)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if stops_early(&e) => {
                warn!("{}: attempt {}/{} failed, not retrying: {}", label, n, max_attempts, e);
                return Err(e);
            }
            Ok(Err(e)) => {
                warn!("{}: attempt {}/{} failed: {}", label, n, max_attempts, e);
                last_error = e.to_string();
            }
            Err(_) => {
                warn!(
                    "{}: attempt {}/{} timed out after {:?}",
                    label, n, max_attempts, policy.attempt_timeout
                );
                last_error = format!("timed out after {:?}", policy.attempt_timeout);
            }
        }
    }

    Err(SniperError::RetriesExhausted {
        label: label.to_string(),
        attempts: max_attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(500), Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: SniperResult<()> = retry_fixed(&policy(2), "sell", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SniperError::RpcError("blockhash not found".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result {
            Err(SniperError::RetriesExhausted { attempts, last_error, .. }) => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("blockhash"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_later_attempt() {
        let result = retry_fixed(&policy(3), "buy", |n| async move {
            if n < 3 {
                Err(SniperError::TransactionError("slippage".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn abandon_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: SniperResult<()> = retry_fixed(&policy(5), "buy", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SniperError::InsufficientBalance("0.001 SOL".into())) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(SniperError::InsufficientBalance(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_counts_against_budget() {
        let calls = AtomicU32::new(0);
        let result: SniperResult<()> = retry_fixed(&policy(2), "close", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending()
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(result, Err(SniperError::RetriesExhausted { .. })));
    }
}
