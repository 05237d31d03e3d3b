use async_trait::async_trait;
use futures_util::StreamExt;
use solana_account_decoder::{UiAccountEncoding, UiDataSliceConfig};
use solana_client::{
    nonblocking::{pubsub_client::PubsubClient, rpc_client::RpcClient},
    rpc_config::{
        RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcSendTransactionConfig,
        RpcTransactionConfig, RpcTransactionLogsConfig, RpcTransactionLogsFilter,
    },
    rpc_filter::{Memcmp, RpcFilterType},
};
use solana_sdk::{
    account::Account,
    commitment_config::{CommitmentConfig, CommitmentLevel},
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use solana_transaction_status::{
    option_serializer::OptionSerializer, TransactionConfirmationStatus, UiLoadedAddresses,
    UiTransactionEncoding,
};
use std::{str::FromStr, sync::Arc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{SniperError, SniperResult};
use crate::solana::ledger::{
    AccountFilter, LargestAccount, LedgerClient, LogNotice, Subscription, SubscriptionHandle, TxStatus,
};

/// Ledger access over the JSON-RPC and PubSub endpoints.
#[derive(Clone)]
pub struct SolanaClient {
    rpc_client: Arc<RpcClient>,
    pubsub: Arc<PubsubClient>,
}

impl SolanaClient {
    pub async fn connect(rpc_url: &str, ws_url: &str) -> SniperResult<Self> {
        let rpc_client =
            RpcClient::new_with_commitment(rpc_url.to_string(), CommitmentConfig::confirmed());
        // Fail fast on a bad endpoint
        match rpc_client.get_latest_blockhash().await {
            Ok(_) => info!("Successfully connected to Solana RPC: {}", rpc_url),
            Err(e) => {
                error!("Failed to connect to Solana RPC {}: {}", rpc_url, e);
                return Err(SniperError::RpcError(format!(
                    "Failed to connect to RPC {}: {}",
                    rpc_url, e
                )));
            }
        }

        let pubsub = PubsubClient::new(ws_url).await.map_err(|e| {
            error!("Failed to connect to Solana websocket {}: {}", ws_url, e);
            SniperError::RpcError(format!("Failed to connect to websocket {}: {}", ws_url, e))
        })?;
        info!("Connected to Solana websocket: {}", ws_url);

        Ok(Self {
            rpc_client: Arc::new(rpc_client),
            pubsub: Arc::new(pubsub),
        })
    }

    fn rpc_error(context: &str, e: impl std::fmt::Display) -> SniperError {
        SniperError::RpcError(format!("{}: {}", context, e))
    }

    fn to_rpc_filter(filter: AccountFilter) -> RpcFilterType {
        match filter {
            AccountFilter::DataSize(size) => RpcFilterType::DataSize(size),
            AccountFilter::Memcmp { offset, bytes } => {
                RpcFilterType::Memcmp(Memcmp::new_base58_encoded(offset, &bytes))
            }
        }
    }

    fn program_accounts_config(
        filters: Vec<AccountFilter>,
        data_slice: Option<UiDataSliceConfig>,
    ) -> RpcProgramAccountsConfig {
        RpcProgramAccountsConfig {
            filters: Some(filters.into_iter().map(Self::to_rpc_filter).collect()),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                data_slice,
                commitment: Some(CommitmentConfig::confirmed()),
                min_context_slot: None,
            },
            ..Default::default()
        }
    }
}

#[async_trait]
impl LedgerClient for SolanaClient {
    async fn get_account_data(&self, address: &Pubkey) -> SniperResult<Option<Vec<u8>>> {
        let response = self
            .rpc_client
            .get_account_with_commitment(address, CommitmentConfig::confirmed())
            .await
            .map_err(|e| Self::rpc_error(&format!("Failed to get account {}", address), e))?;
        Ok(response.value.map(|account| account.data))
    }

    async fn get_multiple_account_data(
        &self,
        addresses: &[Pubkey],
    ) -> SniperResult<Vec<Option<Vec<u8>>>> {
        let accounts = self
            .rpc_client
            .get_multiple_accounts(addresses)
            .await
            .map_err(|e| Self::rpc_error("Failed to get multiple accounts", e))?;
        Ok(accounts
            .into_iter()
            .map(|account| account.map(|a| a.data))
            .collect())
    }

    async fn get_program_accounts(
        &self,
        program: &Pubkey,
        filters: Vec<AccountFilter>,
    ) -> SniperResult<Vec<(Pubkey, Vec<u8>)>> {
        let config = Self::program_accounts_config(filters, None);
        let accounts = self
            .rpc_client
            .get_program_accounts_with_config(program, config)
            .await
            .map_err(|e| Self::rpc_error(&format!("Failed to get accounts of {}", program), e))?;
        Ok(accounts
            .into_iter()
            .map(|(address, account)| (address, account.data))
            .collect())
    }

    async fn count_program_accounts(
        &self,
        program: &Pubkey,
        filters: Vec<AccountFilter>,
    ) -> SniperResult<usize> {
        // Empty data slice: only the keys come back
        let config = Self::program_accounts_config(
            filters,
            Some(UiDataSliceConfig {
                offset: 0,
                length: 0,
            }),
        );
        let accounts = self
            .rpc_client
            .get_program_accounts_with_config(program, config)
            .await
            .map_err(|e| Self::rpc_error(&format!("Failed to count accounts of {}", program), e))?;
        Ok(accounts.len())
    }

    async fn get_token_supply(&self, mint: &Pubkey) -> SniperResult<f64> {
        let supply = self
            .rpc_client
            .get_token_supply(mint)
            .await
            .map_err(|e| Self::rpc_error(&format!("Failed to get supply of {}", mint), e))?;
        match supply.ui_amount {
            Some(amount) => Ok(amount),
            None => supply.ui_amount_string.parse().map_err(|e| {
                SniperError::DecodeError(format!("Bad supply string for {}: {}", mint, e))
            }),
        }
    }

    async fn get_token_largest_accounts(&self, mint: &Pubkey) -> SniperResult<Vec<LargestAccount>> {
        let balances = self
            .rpc_client
            .get_token_largest_accounts(mint)
            .await
            .map_err(|e| Self::rpc_error(&format!("Failed to get largest accounts of {}", mint), e))?;
        balances
            .into_iter()
            .map(|balance| {
                let address = Pubkey::from_str(&balance.address).map_err(|e| {
                    SniperError::DecodeError(format!("Bad holder address {}: {}", balance.address, e))
                })?;
                let ui_amount = match balance.amount.ui_amount {
                    Some(amount) => amount,
                    None => balance.amount.ui_amount_string.parse().map_err(|e| {
                        SniperError::DecodeError(format!("Bad holder amount for {}: {}", address, e))
                    })?,
                };
                Ok(LargestAccount { address, ui_amount })
            })
            .collect()
    }

    async fn get_balance(&self, address: &Pubkey) -> SniperResult<u64> {
        self.rpc_client
            .get_balance(address)
            .await
            .map_err(|e| Self::rpc_error(&format!("Failed to get balance of {}", address), e))
    }

    async fn get_recent_prioritization_fees(&self, accounts: &[Pubkey]) -> SniperResult<Vec<u64>> {
        let fees = self
            .rpc_client
            .get_recent_prioritization_fees(accounts)
            .await
            .map_err(|e| Self::rpc_error("Failed to get prioritization fees", e))?;
        Ok(fees.into_iter().map(|f| f.prioritization_fee).collect())
    }

    async fn get_latest_blockhash(&self) -> SniperResult<Hash> {
        self.rpc_client
            .get_latest_blockhash()
            .await
            .map_err(|e| Self::rpc_error("Failed to get latest blockhash", e))
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
        skip_preflight: bool,
    ) -> SniperResult<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight,
            preflight_commitment: Some(CommitmentLevel::Confirmed),
            encoding: Some(UiTransactionEncoding::Base64),
            max_retries: Some(0), // Resubmission is driven by the order pipeline
            min_context_slot: None,
        };
        let signature = self
            .rpc_client
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(|e| {
                warn!("Failed to send transaction: {}", e);
                SniperError::RpcError(format!("Send failed: {}", e))
            })?;
        debug!("Transaction sent with signature: {}", signature);
        Ok(signature)
    }

    async fn get_signature_status(&self, signature: &Signature) -> SniperResult<Option<TxStatus>> {
        let response = self
            .rpc_client
            .get_signature_statuses(&[*signature])
            .await
            .map_err(|e| Self::rpc_error(&format!("Status check failed for {}", signature), e))?;

        let status = match response.value.into_iter().next().flatten() {
            Some(status) => status,
            None => return Ok(None),
        };
        if let Some(err) = status.err {
            return Ok(Some(TxStatus::Failed(format!("{:?}", err))));
        }
        match status.confirmation_status {
            Some(TransactionConfirmationStatus::Confirmed)
            | Some(TransactionConfirmationStatus::Finalized) => Ok(Some(TxStatus::Confirmed)),
            _ => Ok(None),
        }
    }

    async fn get_transaction_account_keys(&self, signature: &Signature) -> SniperResult<Vec<Pubkey>> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        let confirmed = self
            .rpc_client
            .get_transaction_with_config(signature, config)
            .await
            .map_err(|e| Self::rpc_error(&format!("Failed to get transaction {}", signature), e))?;
        let transaction = confirmed.transaction.transaction.decode().ok_or_else(|| {
            SniperError::DecodeError(format!("Undecodable transaction {}", signature))
        })?;
        let loaded = match confirmed.transaction.meta.as_ref().map(|meta| &meta.loaded_addresses) {
            Some(OptionSerializer::Some(loaded)) => Some(loaded),
            _ => None,
        };
        full_account_keys(transaction.message.static_account_keys(), loaded)
    }

    async fn subscribe_account(&self, address: &Pubkey) -> SniperResult<Subscription<Vec<u8>>> {
        let (updates_tx, updates) = mpsc::unbounded_channel();
        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<SniperResult<()>>();
        let pubsub = self.pubsub.clone();
        let address = *address;

        tokio::spawn(async move {
            let config = RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(CommitmentConfig::confirmed()),
                ..Default::default()
            };
            let (mut stream, unsubscribe) =
                match pubsub.account_subscribe(&address, Some(config)).await {
                    Ok(subscription) => subscription,
                    Err(e) => {
                        let _ = ready_tx.send(Err(Self::rpc_error(
                            &format!("Account subscription to {} failed", address),
                            e,
                        )));
                        return;
                    }
                };
            let _ = ready_tx.send(Ok(()));

            loop {
                tokio::select! {
                    _ = &mut close_rx => break,
                    notification = stream.next() => {
                        let Some(response) = notification else {
                            warn!("Account stream for {} ended", address);
                            break;
                        };
                        match response.value.decode::<Account>() {
                            Some(account) => {
                                if updates_tx.send(account.data).is_err() {
                                    break;
                                }
                            }
                            None => warn!("Undecodable account notification for {}", address),
                        }
                    }
                }
            }
            drop(stream);
            unsubscribe().await;
            debug!("Account subscription to {} closed", address);
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(Subscription {
                updates,
                handle: SubscriptionHandle::new(close_tx),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SniperError::ChannelClosed(format!(
                "subscription task for {} exited",
                address
            ))),
        }
    }

    async fn subscribe_logs(&self, address: &Pubkey) -> SniperResult<Subscription<LogNotice>> {
        let (updates_tx, updates) = mpsc::unbounded_channel();
        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<SniperResult<()>>();
        let pubsub = self.pubsub.clone();
        let address = *address;

        tokio::spawn(async move {
            let filter = RpcTransactionLogsFilter::Mentions(vec![address.to_string()]);
            let config = RpcTransactionLogsConfig {
                commitment: Some(CommitmentConfig::confirmed()),
            };
            let (mut stream, unsubscribe) = match pubsub.logs_subscribe(filter, config).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    let _ = ready_tx.send(Err(Self::rpc_error(
                        &format!("Log subscription to {} failed", address),
                        e,
                    )));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            loop {
                tokio::select! {
                    _ = &mut close_rx => break,
                    notification = stream.next() => {
                        let Some(response) = notification else {
                            warn!("Log stream for {} ended", address);
                            break;
                        };
                        let signature = match Signature::from_str(&response.value.signature) {
                            Ok(signature) => signature,
                            Err(e) => {
                                warn!("Bad signature in log notification: {}", e);
                                continue;
                            }
                        };
                        let notice = LogNotice {
                            signature,
                            err: response.value.err.map(|e| format!("{:?}", e)),
                        };
                        if updates_tx.send(notice).is_err() {
                            break;
                        }
                    }
                }
            }
            drop(stream);
            unsubscribe().await;
            debug!("Log subscription to {} closed", address);
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(Subscription {
                updates,
                handle: SubscriptionHandle::new(close_tx),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SniperError::ChannelClosed(format!(
                "log subscription task for {} exited",
                address
            ))),
        }
    }
}

/// Static keys followed by lookup-table keys, writable before readonly, in
/// the order the runtime indexes them.
fn full_account_keys(
    static_keys: &[Pubkey],
    loaded: Option<&UiLoadedAddresses>,
) -> SniperResult<Vec<Pubkey>> {
    let mut keys = static_keys.to_vec();
    if let Some(loaded) = loaded {
        for address in loaded.writable.iter().chain(loaded.readonly.iter()) {
            let key = Pubkey::from_str(address).map_err(|e| {
                SniperError::DecodeError(format!("Bad loaded address {}: {}", address, e))
            })?;
            keys.push(key);
        }
    }
    Ok(keys)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_table_keys_follow_static_keys() {
        let static_keys = [Pubkey::new_unique(), Pubkey::new_unique()];
        let (writable, readonly) = (Pubkey::new_unique(), Pubkey::new_unique());
        let loaded = UiLoadedAddresses {
            writable: vec![writable.to_string()],
            readonly: vec![readonly.to_string()],
        };

        let keys = full_account_keys(&static_keys, Some(&loaded)).unwrap();
        assert_eq!(keys, vec![static_keys[0], static_keys[1], writable, readonly]);
        assert_eq!(full_account_keys(&static_keys, None).unwrap(), static_keys.to_vec());

        let bad = UiLoadedAddresses {
            writable: vec!["not-a-key".to_string()],
            readonly: Vec::new(),
        };
        assert!(full_account_keys(&static_keys, Some(&bad)).is_err());
    }
}
