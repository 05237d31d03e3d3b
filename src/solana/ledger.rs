use async_trait::async_trait;
use solana_sdk::{
    hash::Hash, pubkey::Pubkey, signature::Signature, transaction::VersionedTransaction,
};
use tokio::sync::{mpsc, oneshot};

use crate::error::SniperResult;

// ============================================================================
// Ledger seam
// ============================================================================

/// Program-account query filter, mirrored from the RPC filter types so the
/// trait does not leak `solana-client` config structs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountFilter {
    DataSize(u64),
    Memcmp { offset: usize, bytes: Vec<u8> },
}

impl AccountFilter {
    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            Self::DataSize(size) => data.len() as u64 == *size,
            Self::Memcmp { offset, bytes } => data
                .get(*offset..offset + bytes.len())
                .map_or(false, |window| window == bytes.as_slice()),
        }
    }
}

/// Final state of a submitted transaction as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Confirmed,
    Failed(String),
}

/// A log notification for a subscribed address.
#[derive(Debug, Clone)]
pub struct LogNotice {
    pub signature: Signature,
    pub err: Option<String>,
}

/// One of a mint's largest token accounts.
#[derive(Debug, Clone, PartialEq)]
pub struct LargestAccount {
    pub address: Pubkey,
    pub ui_amount: f64,
}

/// Closing (or dropping) the handle ends the subscription.
#[derive(Debug)]
pub struct SubscriptionHandle {
    close_tx: Option<oneshot::Sender<()>>,
}

impl SubscriptionHandle {
    pub fn new(close_tx: oneshot::Sender<()>) -> Self {
        Self {
            close_tx: Some(close_tx),
        }
    }

    pub fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(()); // Receiver may already be gone
        }
    }

    pub fn is_closed(&self) -> bool {
        self.close_tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Stream of notifications plus the handle that tears it down.
#[derive(Debug)]
pub struct Subscription<T> {
    pub updates: mpsc::UnboundedReceiver<T>,
    pub handle: SubscriptionHandle,
}

impl<T> Subscription<T> {
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<T>, SubscriptionHandle) {
        (self.updates, self.handle)
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Raw account data, `None` when the account does not exist.
    async fn get_account_data(&self, address: &Pubkey) -> SniperResult<Option<Vec<u8>>>;

    async fn get_multiple_account_data(
        &self,
        addresses: &[Pubkey],
    ) -> SniperResult<Vec<Option<Vec<u8>>>>;

    async fn get_program_accounts(
        &self,
        program: &Pubkey,
        filters: Vec<AccountFilter>,
    ) -> SniperResult<Vec<(Pubkey, Vec<u8>)>>;

    /// Number of accounts matching the filters, without downloading their data.
    async fn count_program_accounts(
        &self,
        program: &Pubkey,
        filters: Vec<AccountFilter>,
    ) -> SniperResult<usize>;

    /// Circulating supply in UI units.
    async fn get_token_supply(&self, mint: &Pubkey) -> SniperResult<f64>;

    /// The mint's largest token accounts, biggest first (at most 20).
    async fn get_token_largest_accounts(&self, mint: &Pubkey) -> SniperResult<Vec<LargestAccount>>;

    /// Native balance in lamports.
    async fn get_balance(&self, address: &Pubkey) -> SniperResult<u64>;

    /// Recent per-slot prioritization fees (micro-lamports per CU) for the accounts.
    async fn get_recent_prioritization_fees(&self, accounts: &[Pubkey]) -> SniperResult<Vec<u64>>;

    async fn get_latest_blockhash(&self) -> SniperResult<Hash>;

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
        skip_preflight: bool,
    ) -> SniperResult<Signature>;

    /// `None` while the transaction is not yet confirmed.
    async fn get_signature_status(&self, signature: &Signature) -> SniperResult<Option<TxStatus>>;

    async fn get_transaction_account_keys(&self, signature: &Signature) -> SniperResult<Vec<Pubkey>>;

    async fn subscribe_account(&self, address: &Pubkey) -> SniperResult<Subscription<Vec<u8>>>;

    async fn subscribe_logs(&self, address: &Pubkey) -> SniperResult<Subscription<LogNotice>>;
}

// ============================================================================
// In-memory ledger for tests
// ============================================================================


#[cfg(test)]
mod tests {
    use super::mock::MockLedger;
    use super::*;

    #[test]
    fn memcmp_filter_checks_window() {
        let owner = Pubkey::new_unique();
        let mut data = vec![0u8; 165];
        data[32..64].copy_from_slice(owner.as_ref());

        let filter = AccountFilter::Memcmp {
            offset: 32,
            bytes: owner.to_bytes().to_vec(),
        };
        assert!(filter.matches(&data));
        assert!(AccountFilter::DataSize(165).matches(&data));
        assert!(!AccountFilter::DataSize(82).matches(&data));
        assert!(!filter.matches(&data[..40])); // Window runs past the end
    }

    #[tokio::test]
    async fn dropping_handle_ends_subscription() {
        let ledger = MockLedger::new();
        let address = Pubkey::new_unique();

        let sub = ledger.subscribe_account(&address).await.unwrap();
        assert!(ledger.is_subscribed(&address));

        let (mut updates, handle) = sub.into_parts();
        ledger.push_account_update(address, vec![1, 2, 3]);
        assert_eq!(updates.recv().await, Some(vec![1, 2, 3]));

        drop(handle);
        assert!(!ledger.is_subscribed(&address));
        ledger.push_account_update(address, vec![4]);
        assert!(updates.try_recv().is_err());
    }
}
