use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::{v0::Message, VersionedMessage},
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
    transaction::VersionedTransaction,
};
use spl_associated_token_account::get_associated_token_address;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{SniperError, SniperResult};

#[derive(Clone)]
pub struct WalletManager {
    keypair: Arc<Keypair>,
}

impl WalletManager {
    pub fn new(private_key_bs58: &str) -> SniperResult<Self> {
        // Decode base58 private key
        let bytes = bs58::decode(private_key_bs58.trim())
            .into_vec()
            .map_err(|e| {
                error!("Failed to decode base58 private key: {}", e);
                SniperError::WalletError(format!("Invalid private key format: {}", e))
            })?;

        let keypair = Keypair::from_bytes(&bytes).map_err(|e| {
            error!("Failed to create keypair from bytes: {}", e);
            SniperError::WalletError(format!("Invalid private key data: {}", e))
        })?;

        info!("WalletManager initialized. Pubkey: {}", keypair.pubkey());
        Ok(Self::from_keypair(keypair))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Fresh keypair, returned with its base58 secret for the settings file.
    pub fn generate() -> (Self, String) {
        let keypair = Keypair::new();
        let secret = bs58::encode(keypair.to_bytes()).into_string();
        (Self::from_keypair(keypair), secret)
    }

    pub fn get_public_key(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn associated_token_account(&self, mint: &Pubkey) -> Pubkey {
        get_associated_token_address(&self.get_public_key(), mint)
    }

    pub fn wsol_account(&self) -> Pubkey {
        self.associated_token_account(&spl_token::native_mint::id())
    }

    /// Compiles a v0 message paid by this wallet and signs it.
    pub fn sign(
        &self,
        instructions: &[Instruction],
        recent_blockhash: Hash,
    ) -> SniperResult<VersionedTransaction> {
        let message = Message::try_compile(&self.get_public_key(), instructions, &[], recent_blockhash)
            .map_err(|e| SniperError::WalletError(format!("Message compile failed: {}", e)))?;
        VersionedTransaction::try_new(VersionedMessage::V0(message), &[self.keypair.as_ref()])
            .map_err(|e| {
                error!("Failed to sign versioned transaction: {}", e);
                SniperError::WalletError(format!("Signing failed: {}", e))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::system_instruction;

    #[test]
    fn generated_secret_round_trips() {
        let (wallet, secret) = WalletManager::generate();
        let restored = WalletManager::new(&secret).unwrap();
        assert_eq!(wallet.get_public_key(), restored.get_public_key());
        assert!(WalletManager::new("not-a-key").is_err());
    }

    #[test]
    fn signs_with_payer_first() {
        let wallet = WalletManager::from_keypair(Keypair::new());
        let ix = system_instruction::transfer(&wallet.get_public_key(), &Pubkey::new_unique(), 1);
        let tx = wallet.sign(&[ix], Hash::new_unique()).unwrap();
        assert_eq!(tx.signatures.len(), 1);
        assert_eq!(
            tx.message.static_account_keys()[0],
            wallet.get_public_key()
        );
        assert!(tx.verify_with_results().iter().all(|ok| *ok));
    }
}
