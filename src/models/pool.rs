use solana_sdk::pubkey::Pubkey;

/// One side of a pool, named from the position's point of view:
/// `Base` is the traded token, `Quote` is the SOL side, regardless of how
/// the pool orders its mints on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaultSide {
    Base,
    Quote,
}

impl std::fmt::Display for VaultSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Base => write!(f, "base"),
            Self::Quote => write!(f, "quote"),
        }
    }
}

/// Resolved addresses of a Raydium AMM v4 pool and its OpenBook market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolKeys {
    pub id: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub program_id: Pubkey,
    pub authority: Pubkey,
    pub open_orders: Pubkey,
    pub target_orders: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub market_program_id: Pubkey,
    pub market_id: Pubkey,
    pub market_authority: Pubkey,
    pub market_base_vault: Pubkey,
    pub market_quote_vault: Pubkey,
    pub market_bids: Pubkey,
    pub market_asks: Pubkey,
    pub market_event_queue: Pubkey,
}

impl PoolKeys {
    /// True when the on-chain base mint is the traded token (quote is WSOL).
    pub fn token_is_base(&self) -> bool {
        self.base_mint != spl_token::native_mint::id()
    }

    pub fn token_mint(&self) -> Pubkey {
        if self.token_is_base() {
            self.base_mint
        } else {
            self.quote_mint
        }
    }

    pub fn vault(&self, side: VaultSide) -> Pubkey {
        match (side, self.token_is_base()) {
            (VaultSide::Base, true) | (VaultSide::Quote, false) => self.base_vault,
            (VaultSide::Base, false) | (VaultSide::Quote, true) => self.quote_vault,
        }
    }

    pub fn decimals(&self, side: VaultSide) -> u8 {
        match (side, self.token_is_base()) {
            (VaultSide::Base, true) | (VaultSide::Quote, false) => self.base_decimals,
            (VaultSide::Base, false) | (VaultSide::Quote, true) => self.quote_decimals,
        }
    }

    pub fn token_decimals(&self) -> u8 {
        self.decimals(VaultSide::Base)
    }

    /// Accounts a swap write-locks; used to sample recent priority fees.
    pub fn writable_accounts(&self) -> Vec<Pubkey> {
        vec![
            self.id,
            self.open_orders,
            self.target_orders,
            self.market_id,
            self.quote_vault,
            self.base_vault,
        ]
    }
}

#[cfg(test)]
pub(crate) fn sample_pool_keys(token_mint: Pubkey, token_is_base: bool) -> PoolKeys {
    let wsol = spl_token::native_mint::id();
    let (base_mint, quote_mint, base_decimals, quote_decimals) = if token_is_base {
        (token_mint, wsol, 6, 9)
    } else {
        (wsol, token_mint, 9, 6)
    };
    PoolKeys {
        id: Pubkey::new_unique(),
        base_mint,
        quote_mint,
        lp_mint: Pubkey::new_unique(),
        base_decimals,
        quote_decimals,
        program_id: Pubkey::new_unique(),
        authority: Pubkey::new_unique(),
        open_orders: Pubkey::new_unique(),
        target_orders: Pubkey::new_unique(),
        base_vault: Pubkey::new_unique(),
        quote_vault: Pubkey::new_unique(),
        market_program_id: Pubkey::new_unique(),
        market_id: Pubkey::new_unique(),
        market_authority: Pubkey::new_unique(),
        market_base_vault: Pubkey::new_unique(),
        market_quote_vault: Pubkey::new_unique(),
        market_bids: Pubkey::new_unique(),
        market_asks: Pubkey::new_unique(),
        market_event_queue: Pubkey::new_unique(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sides_follow_token_position_in_pool() {
        let mint = Pubkey::new_unique();

        let keys = sample_pool_keys(mint, true);
        assert_eq!(keys.token_mint(), mint);
        assert_eq!(keys.vault(VaultSide::Base), keys.base_vault);
        assert_eq!(keys.vault(VaultSide::Quote), keys.quote_vault);
        assert_eq!(keys.token_decimals(), 6);

        let flipped = sample_pool_keys(mint, false);
        assert_eq!(flipped.token_mint(), mint);
        assert_eq!(flipped.vault(VaultSide::Base), flipped.quote_vault);
        assert_eq!(flipped.vault(VaultSide::Quote), flipped.base_vault);
        assert_eq!(flipped.decimals(VaultSide::Quote), 9);
        assert_eq!(flipped.token_decimals(), 6);
    }
}
