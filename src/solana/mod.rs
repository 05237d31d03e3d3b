pub mod client;
pub mod ledger;
pub mod raydium;
pub mod token;
pub mod wallet;

pub use ledger::{AccountFilter, LedgerClient, LogNotice, Subscription, SubscriptionHandle, TxStatus};
