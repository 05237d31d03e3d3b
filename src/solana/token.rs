use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use spl_token::state::{Account, Mint};

use crate::error::{SniperError, SniperResult};

pub const TOKEN_ACCOUNT_LEN: usize = Account::LEN;
// Offset of the owner field, for memcmp program-account filters
pub const TOKEN_ACCOUNT_OWNER_OFFSET: usize = 32;

/// Rent-exempt minimum for a token account.
pub const TOKEN_ACCOUNT_RENT_LAMPORTS: u64 = 2_039_280;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAccountInfo {
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
}

pub fn decode_token_account(data: &[u8]) -> SniperResult<TokenAccountInfo> {
    let account = Account::unpack(data)
        .map_err(|e| SniperError::DecodeError(format!("token account: {}", e)))?;
    Ok(TokenAccountInfo {
        mint: account.mint,
        owner: account.owner,
        amount: account.amount,
    })
}

pub fn decode_token_amount(data: &[u8]) -> SniperResult<u64> {
    decode_token_account(data).map(|account| account.amount)
}

/// Balance carried by a token account notification. Closing an account
/// empties its data, which reads as `None`.
pub fn token_balance_update(data: &[u8]) -> SniperResult<Option<u64>> {
    if data.is_empty() {
        return Ok(None);
    }
    decode_token_amount(data).map(Some)
}

pub fn decode_mint_decimals(data: &[u8]) -> SniperResult<u8> {
    Mint::unpack(data)
        .map(|mint| mint.decimals)
        .map_err(|e| SniperError::DecodeError(format!("mint account: {}", e)))
}

pub fn to_ui_amount(raw: u64, decimals: u8) -> f64 {
    spl_token::amount_to_ui_amount(raw, decimals)
}

#[cfg(test)]
pub(crate) fn encode_token_account(mint: &Pubkey, owner: &Pubkey, amount: u64) -> Vec<u8> {
    let account = Account {
        mint: *mint,
        owner: *owner,
        amount,
        state: spl_token::state::AccountState::Initialized,
        ..Account::default()
    };
    let mut data = vec![0u8; Account::LEN];
    account.pack_into_slice(&mut data);
    data
}

#[cfg(test)]
pub(crate) fn encode_mint(decimals: u8) -> Vec<u8> {
    let mint = Mint {
        decimals,
        is_initialized: true,
        ..Mint::default()
    };
    let mut data = vec![0u8; Mint::LEN];
    mint.pack_into_slice(&mut data);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_token_account_fields() {
        let mint = Pubkey::new_unique();
        let owner = Pubkey::new_unique();
        let data = encode_token_account(&mint, &owner, 1_234_567);

        let info = decode_token_account(&data).unwrap();
        assert_eq!(info.mint, mint);
        assert_eq!(info.owner, owner);
        assert_eq!(info.amount, 1_234_567);
        assert_eq!(decode_mint_decimals(&encode_mint(6)).unwrap(), 6);
        assert!(decode_token_amount(&data[..70]).is_err());
    }

    #[test]
    fn rejects_buffers_that_are_not_token_accounts() {
        assert!(decode_token_amount(&[0u8; 72]).is_err());
        assert!(decode_token_amount(&[0u8; TOKEN_ACCOUNT_LEN]).is_err()); // Uninitialized
        assert!(decode_mint_decimals(&[0u8; Mint::LEN]).is_err());
        assert!(decode_mint_decimals(&encode_token_account(&Pubkey::new_unique(), &Pubkey::new_unique(), 1)).is_err());
    }

    #[test]
    fn closed_account_update_has_no_balance() {
        let data = encode_token_account(&Pubkey::new_unique(), &Pubkey::new_unique(), 9);
        assert_eq!(token_balance_update(&data).unwrap(), Some(9));
        assert_eq!(token_balance_update(&[]).unwrap(), None);
        assert!(token_balance_update(&[1, 2, 3]).is_err());
    }

    #[test]
    fn ui_amount_scales_by_decimals() {
        assert_eq!(to_ui_amount(1_500_000, 6), 1.5);
        assert_eq!(to_ui_amount(0, 9), 0.0);
    }
}
