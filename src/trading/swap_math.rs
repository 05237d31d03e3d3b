/// Pool pricing used to quote a swap before submission.
pub trait SwapMath: Send + Sync {
    /// Output amount for `amount_in`, all values raw token units.
    fn amount_out(&self, amount_in: u64, reserve_in: u64, reserve_out: u64) -> u64;

    /// Quoted output reduced by the slippage tolerance; never below 1.
    fn min_amount_out(&self, amount_in: u64, reserve_in: u64, reserve_out: u64, slippage_pct: f64) -> u64 {
        let quoted = self.amount_out(amount_in, reserve_in, reserve_out);
        if slippage_pct <= 0.0 {
            return 1;
        }
        let factor = (100.0 - slippage_pct.min(100.0)) / 100.0;
        ((quoted as f64 * factor).floor() as u64).max(1)
    }
}

/// Raydium AMM v4 constant product, 0.25% trade fee taken from the input.
#[derive(Debug, Clone, Copy)]
pub struct ConstantProduct {
    pub fee_numerator: u64,
    pub fee_denominator: u64,
}

impl Default for ConstantProduct {
    fn default() -> Self {
        Self {
            fee_numerator: 25,
            fee_denominator: 10_000,
        }
    }
}

impl SwapMath for ConstantProduct {
    fn amount_out(&self, amount_in: u64, reserve_in: u64, reserve_out: u64) -> u64 {
        if reserve_in == 0 || reserve_out == 0 || amount_in == 0 {
            return 0;
        }
        let amount_in = amount_in as u128;
        let fee = amount_in * self.fee_numerator as u128 / self.fee_denominator as u128;
        let net_in = amount_in - fee;
        let out = reserve_out as u128 * net_in / (reserve_in as u128 + net_in);
        out.min(u64::MAX as u128) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_product_takes_fee() {
        let math = ConstantProduct::default();
        // Fee floors to 2, so 998 goes in: floor(1e6 * 998 / 1_000_998)
        assert_eq!(math.amount_out(1_000, 1_000_000, 1_000_000), 996);
        assert_eq!(math.amount_out(1_000, 0, 1_000_000), 0);
    }

    #[test]
    fn slippage_zero_means_min_out_one() {
        let math = ConstantProduct::default();
        assert_eq!(math.min_amount_out(1_000, 1_000_000, 1_000_000, 0.0), 1);
        assert_eq!(math.min_amount_out(1_000, 1_000_000, 1_000_000, 25.0), 747);
        assert_eq!(math.min_amount_out(1, 1_000_000, 10, 25.0), 1);
    }
}
