use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    instruction::{AccountMeta, Instruction},
    pubkey,
    pubkey::Pubkey,
};
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{SniperError, SniperResult};
use crate::models::PoolKeys;
use crate::solana::ledger::{AccountFilter, LedgerClient};
use crate::solana::token::decode_mint_decimals;

pub const RAYDIUM_AMM_V4: Pubkey = pubkey!("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8");
pub const OPENBOOK_PROGRAM: Pubkey = pubkey!("srmqPvymJeFKQ4zGQed1GFppgkRHL9kaELCbyksJtPX");

const SWAP_BASE_IN_TAG: u8 = 9;
const WSOL_DECIMALS: u8 = 9;

// ============================================================================
// OpenBook market (MARKET_STATE_LAYOUT_V3)
// ============================================================================

pub const MARKET_STATE_LEN: u64 = 388;
const MARKET_NONCE_OFFSET: usize = 45;
const MARKET_BASE_MINT_OFFSET: usize = 53;
const MARKET_QUOTE_MINT_OFFSET: usize = 85;
const MARKET_BASE_VAULT_OFFSET: usize = 117;
const MARKET_QUOTE_VAULT_OFFSET: usize = 165;
const MARKET_EVENT_QUEUE_OFFSET: usize = 253;
const MARKET_BIDS_OFFSET: usize = 285;
const MARKET_ASKS_OFFSET: usize = 317;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketState {
    pub vault_signer_nonce: u64,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub event_queue: Pubkey,
    pub bids: Pubkey,
    pub asks: Pubkey,
}

fn read_pubkey(data: &[u8], offset: usize) -> SniperResult<Pubkey> {
    data.get(offset..offset + 32)
        .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
        .map(Pubkey::new_from_array)
        .ok_or_else(|| SniperError::DecodeError(format!("market too short for pubkey at {}", offset)))
}

fn read_u64(data: &[u8], offset: usize) -> SniperResult<u64> {
    data.get(offset..offset + 8)
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| SniperError::DecodeError(format!("market too short for u64 at {}", offset)))
}

pub fn decode_market(data: &[u8]) -> SniperResult<MarketState> {
    if data.len() < MARKET_STATE_LEN as usize {
        return Err(SniperError::DecodeError(format!(
            "market account is {} bytes, expected {}",
            data.len(),
            MARKET_STATE_LEN
        )));
    }
    Ok(MarketState {
        vault_signer_nonce: read_u64(data, MARKET_NONCE_OFFSET)?,
        base_mint: read_pubkey(data, MARKET_BASE_MINT_OFFSET)?,
        quote_mint: read_pubkey(data, MARKET_QUOTE_MINT_OFFSET)?,
        base_vault: read_pubkey(data, MARKET_BASE_VAULT_OFFSET)?,
        quote_vault: read_pubkey(data, MARKET_QUOTE_VAULT_OFFSET)?,
        event_queue: read_pubkey(data, MARKET_EVENT_QUEUE_OFFSET)?,
        bids: read_pubkey(data, MARKET_BIDS_OFFSET)?,
        asks: read_pubkey(data, MARKET_ASKS_OFFSET)?,
    })
}

// ============================================================================
// Pool key derivation
// ============================================================================

fn associated_address(market_id: &Pubkey, seed: &[u8]) -> Pubkey {
    Pubkey::find_program_address(&[RAYDIUM_AMM_V4.as_ref(), market_id.as_ref(), seed], &RAYDIUM_AMM_V4).0
}

fn market_authority(market_id: &Pubkey, nonce: u64) -> SniperResult<Pubkey> {
    Pubkey::create_program_address(&[market_id.as_ref(), &nonce.to_le_bytes()], &OPENBOOK_PROGRAM)
        .map_err(|e| {
            SniperError::DecodeError(format!("bad vault signer nonce for market {}: {}", market_id, e))
        })
}

/// Derives every AMM v4 address for a v3 market. `token_decimals` applies to
/// whichever side is not WSOL.
pub fn derive_pool_keys(
    market_id: Pubkey,
    market: &MarketState,
    token_decimals: u8,
) -> SniperResult<PoolKeys> {
    let wsol = spl_token::native_mint::id();
    let (base_decimals, quote_decimals) = if market.base_mint == wsol {
        (WSOL_DECIMALS, token_decimals)
    } else {
        (token_decimals, WSOL_DECIMALS)
    };

    Ok(PoolKeys {
        id: associated_address(&market_id, b"amm_associated_seed"),
        base_mint: market.base_mint,
        quote_mint: market.quote_mint,
        lp_mint: associated_address(&market_id, b"lp_mint_associated_seed"),
        base_decimals,
        quote_decimals,
        program_id: RAYDIUM_AMM_V4,
        authority: Pubkey::find_program_address(&[b"amm authority"], &RAYDIUM_AMM_V4).0,
        open_orders: associated_address(&market_id, b"open_order_associated_seed"),
        target_orders: associated_address(&market_id, b"target_associated_seed"),
        base_vault: associated_address(&market_id, b"coin_vault_associated_seed"),
        quote_vault: associated_address(&market_id, b"pc_vault_associated_seed"),
        market_program_id: OPENBOOK_PROGRAM,
        market_id,
        market_authority: market_authority(&market_id, market.vault_signer_nonce)?,
        market_base_vault: market.base_vault,
        market_quote_vault: market.quote_vault,
        market_bids: market.bids,
        market_asks: market.asks,
        market_event_queue: market.event_queue,
    })
}

// ============================================================================
// Pool key cache
// ============================================================================

/// Resolves pool keys once per mint and keeps them for the process lifetime.
pub struct PoolKeyResolver {
    ledger: Arc<dyn LedgerClient>,
    cache: RwLock<HashMap<Pubkey, Arc<PoolKeys>>>,
}

impl PoolKeyResolver {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            ledger,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn cached(&self, mint: &Pubkey) -> Option<Arc<PoolKeys>> {
        self.cache.read().await.get(mint).cloned()
    }

    pub async fn seed(&self, keys: PoolKeys) -> Arc<PoolKeys> {
        let keys = Arc::new(keys);
        self.cache
            .write()
            .await
            .insert(keys.token_mint(), keys.clone());
        keys
    }

    pub async fn resolve(&self, mint: &Pubkey) -> SniperResult<Arc<PoolKeys>> {
        if let Some(keys) = self.cached(mint).await {
            return Ok(keys);
        }

        let (market_id, market) = self.find_market(mint).await?;
        let mint_data = self
            .ledger
            .get_account_data(mint)
            .await?
            .ok_or_else(|| SniperError::PoolNotFound(format!("mint account {} missing", mint)))?;
        let decimals = decode_mint_decimals(&mint_data)?;

        let keys = derive_pool_keys(market_id, &market, decimals)?;
        info!("Resolved pool {} for mint {} (market {})", keys.id, mint, market_id);
        Ok(self.seed(keys).await)
    }

    /// Finds the OpenBook market listing the mint, trying it as base then as quote.
    async fn find_market(&self, mint: &Pubkey) -> SniperResult<(Pubkey, MarketState)> {
        for offset in [MARKET_BASE_MINT_OFFSET, MARKET_QUOTE_MINT_OFFSET] {
            let filters = vec![
                AccountFilter::DataSize(MARKET_STATE_LEN),
                AccountFilter::Memcmp {
                    offset,
                    bytes: mint.to_bytes().to_vec(),
                },
            ];
            let accounts = self.ledger.get_program_accounts(&OPENBOOK_PROGRAM, filters).await?;
            if let Some((market_id, data)) = accounts.into_iter().next() {
                debug!("Found market {} for {} at offset {}", market_id, mint, offset);
                return Ok((market_id, decode_market(&data)?));
            }
        }
        Err(SniperError::PoolNotFound(format!("no OpenBook market for {}", mint)))
    }
}

// ============================================================================
// Instructions
// ============================================================================

pub fn compute_budget_instructions(unit_limit: u32, micro_lamports: u64) -> [Instruction; 2] {
    [
        ComputeBudgetInstruction::set_compute_unit_limit(unit_limit),
        ComputeBudgetInstruction::set_compute_unit_price(micro_lamports),
    ]
}

pub fn create_ata_idempotent(owner: &Pubkey, mint: &Pubkey) -> Instruction {
    create_associated_token_account_idempotent(owner, owner, mint, &spl_token::id())
}

/// Raydium AMM v4 `swap_base_in`: spend exactly `amount_in` from `user_source`.
pub fn swap_base_in(
    keys: &PoolKeys,
    user_source: &Pubkey,
    user_destination: &Pubkey,
    owner: &Pubkey,
    amount_in: u64,
    min_amount_out: u64,
) -> Instruction {
    let mut data = Vec::with_capacity(17);
    data.push(SWAP_BASE_IN_TAG);
    data.extend_from_slice(&amount_in.to_le_bytes());
    data.extend_from_slice(&min_amount_out.to_le_bytes());

    let accounts = vec![
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new(keys.id, false),
        AccountMeta::new_readonly(keys.authority, false),
        AccountMeta::new(keys.open_orders, false),
        AccountMeta::new(keys.target_orders, false),
        AccountMeta::new(keys.base_vault, false),
        AccountMeta::new(keys.quote_vault, false),
        AccountMeta::new_readonly(keys.market_program_id, false),
        AccountMeta::new(keys.market_id, false),
        AccountMeta::new(keys.market_bids, false),
        AccountMeta::new(keys.market_asks, false),
        AccountMeta::new(keys.market_event_queue, false),
        AccountMeta::new(keys.market_base_vault, false),
        AccountMeta::new(keys.market_quote_vault, false),
        AccountMeta::new_readonly(keys.market_authority, false),
        AccountMeta::new(*user_source, false),
        AccountMeta::new(*user_destination, false),
        AccountMeta::new_readonly(*owner, true),
    ];

    Instruction {
        program_id: keys.program_id,
        accounts,
        data,
    }
}

/// Close (and optionally burn the remaining dust of) a token account,
/// returning its rent to the owner.
pub fn close_token_account_instructions(
    account: &Pubkey,
    mint: &Pubkey,
    owner: &Pubkey,
    burn_amount: Option<u64>,
) -> SniperResult<Vec<Instruction>> {
    let mut instructions = Vec::with_capacity(2);
    if let Some(amount) = burn_amount.filter(|a| *a > 0) {
        instructions.push(
            spl_token::instruction::burn(&spl_token::id(), account, mint, owner, &[], amount)
                .map_err(|e| SniperError::TransactionError(format!("burn instruction: {}", e)))?,
        );
    }
    instructions.push(
        spl_token::instruction::close_account(&spl_token::id(), account, owner, owner, &[])
            .map_err(|e| SniperError::TransactionError(format!("close instruction: {}", e)))?,
    );
    Ok(instructions)
}

#[cfg(test)]
pub(crate) fn encode_market(market: &MarketState) -> Vec<u8> {
    let mut data = vec![0u8; MARKET_STATE_LEN as usize];
    data[MARKET_NONCE_OFFSET..MARKET_NONCE_OFFSET + 8]
        .copy_from_slice(&market.vault_signer_nonce.to_le_bytes());
    for (offset, key) in [
        (MARKET_BASE_MINT_OFFSET, market.base_mint),
        (MARKET_QUOTE_MINT_OFFSET, market.quote_mint),
        (MARKET_BASE_VAULT_OFFSET, market.base_vault),
        (MARKET_QUOTE_VAULT_OFFSET, market.quote_vault),
        (MARKET_EVENT_QUEUE_OFFSET, market.event_queue),
        (MARKET_BIDS_OFFSET, market.bids),
        (MARKET_ASKS_OFFSET, market.asks),
    ] {
        data[offset..offset + 32].copy_from_slice(key.as_ref());
    }
    data
}

/// A market for `base_mint`/WSOL with a vault signer nonce that derives.
#[cfg(test)]
pub(crate) fn sample_market(market_id: &Pubkey, base_mint: Pubkey) -> MarketState {
    let nonce = (0..255u64)
        .find(|n| market_authority(market_id, *n).is_ok())
        .unwrap();
    MarketState {
        vault_signer_nonce: nonce,
        base_mint,
        quote_mint: spl_token::native_mint::id(),
        base_vault: Pubkey::new_unique(),
        quote_vault: Pubkey::new_unique(),
        event_queue: Pubkey::new_unique(),
        bids: Pubkey::new_unique(),
        asks: Pubkey::new_unique(),
    }
}
