use anyhow::{anyhow, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::api::dexscreener::DexInterval;
use crate::trading::exit_rules::{parse_sell_levels, ExitRules, SellLevel};
use crate::trading::filters::{FilterArgs, FilterGate};
use crate::trading::orders::OrderConfig;
use crate::trading::position::PositionSettings;

/// Trading parameters read from the environment (after `.env`). Wallet, RPC
/// URL and buy sizing live in the settings file instead.
#[derive(Clone, Debug)]
pub struct Config {
    pub solana_ws_url: Option<String>, // Derived from the RPC URL when unset
    pub birdeye_api_key: Option<String>,

    pub sell_interval_ms: u64,
    pub price_cache_ttl_secs: u64,

    pub stop_loss_percent: f64,
    pub trailing_stop_percent: f64,
    pub trailing_sell_percent: f64,
    pub sell_levels: Vec<SellLevel>,
    pub allow_trailing_with_levels: bool,
    pub dust_threshold: f64,

    pub max_fee_micro_lamports: u64,
    pub fallback_fee_micro_lamports: u64,
    pub order_retry_ms: u64,
    pub confirm_timeout_secs: u64,
    pub sell_max_attempts: u32,

    pub filter_check_interval_ms: u64,
    pub filter_check_duration_ms: u64,
    pub consecutive_match_count: u32,
    pub min_market_cap: f64,
    pub max_market_cap: f64,
    pub min_holder_count: u64,
    pub max_top_holder_percent: f64,
    pub min_volume: f64,
    pub min_buys: u64,
    pub dex_interval: DexInterval,
}

fn parse_var<T, F>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .map_err(|e| anyhow!("{}", e))
        .with_context(|| format!("Failed to parse {}='{}'", key, raw))
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok().filter(|v| !v.trim().is_empty()))
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let sell_levels = parse_sell_levels(
            &lookup("SELL_LEVELS").unwrap_or_else(|| "1.1:20,1.2:20,1.3:20,1.4:20,1.5:20".to_string()),
        )
        .map_err(|e| anyhow!(e))
        .context("Failed to parse SELL_LEVELS")?;

        let allow_trailing_with_levels = match lookup("ALLOW_TRAILING_WITH_LEVELS") {
            Some(v) => match v.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                other => return Err(anyhow!("Failed to parse ALLOW_TRAILING_WITH_LEVELS='{}'", other)),
            },
            None => true,
        };

        let config = Self {
            solana_ws_url: lookup("SOLANA_WS_URL"),
            birdeye_api_key: lookup("BIRDEYE_API_KEY"),

            sell_interval_ms: parse_var(&lookup, "SELL_INTERVAL_MS", "3000")?,
            price_cache_ttl_secs: parse_var(&lookup, "PRICE_CACHE_TTL_SECS", "2")?,

            stop_loss_percent: parse_var(&lookup, "STOP_LOSS_PERCENT", "10")?,
            trailing_stop_percent: parse_var(&lookup, "TRAILING_STOP_PERCENT", "10")?,
            trailing_sell_percent: parse_var(&lookup, "TRAILING_SELL_PERCENT", "20")?,
            sell_levels,
            allow_trailing_with_levels,
            dust_threshold: parse_var(&lookup, "DUST_THRESHOLD", "0.00005")?,

            max_fee_micro_lamports: parse_var(&lookup, "MAX_FEE_MICRO_LAMPORTS", "650000")?,
            fallback_fee_micro_lamports: parse_var(&lookup, "FALLBACK_FEE_MICRO_LAMPORTS", "50000")?,
            order_retry_ms: parse_var(&lookup, "ORDER_RETRY_MS", "500")?,
            confirm_timeout_secs: parse_var(&lookup, "CONFIRM_TIMEOUT_SECS", "30")?,
            sell_max_attempts: parse_var(&lookup, "SELL_MAX_ATTEMPTS", "1")?,

            filter_check_interval_ms: parse_var(&lookup, "FILTER_CHECK_INTERVAL_MS", "1000")?,
            filter_check_duration_ms: parse_var(&lookup, "FILTER_CHECK_DURATION_MS", "60000")?,
            consecutive_match_count: parse_var(&lookup, "CONSECUTIVE_MATCH_COUNT", "1")?,
            min_market_cap: parse_var(&lookup, "MIN_MARKET_CAP", "0")?,
            max_market_cap: parse_var(&lookup, "MAX_MARKET_CAP", "0")?,
            min_holder_count: parse_var(&lookup, "MIN_HOLDER_COUNT", "70")?,
            max_top_holder_percent: parse_var(&lookup, "MAX_TOP_HOLDER_PERCENT", "0")?,
            min_volume: parse_var(&lookup, "MIN_VOLUME", "0")?,
            min_buys: parse_var(&lookup, "MIN_BUYS", "0")?,
            dex_interval: parse_var(&lookup, "DEX_INTERVAL", "m5")?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (key, pct) in [
            ("STOP_LOSS_PERCENT", self.stop_loss_percent),
            ("TRAILING_STOP_PERCENT", self.trailing_stop_percent),
            ("TRAILING_SELL_PERCENT", self.trailing_sell_percent),
            ("MAX_TOP_HOLDER_PERCENT", self.max_top_holder_percent),
        ] {
            if !(0.0..=100.0).contains(&pct) {
                return Err(anyhow!("{} must be within 0..=100, got {}", key, pct));
            }
        }
        if self.sell_interval_ms == 0 {
            return Err(anyhow!("SELL_INTERVAL_MS must be positive"));
        }
        if self.sell_max_attempts == 0 {
            return Err(anyhow!("SELL_MAX_ATTEMPTS must be at least 1"));
        }
        if self.max_market_cap != 0.0 && self.min_market_cap > self.max_market_cap {
            return Err(anyhow!(
                "MIN_MARKET_CAP {} exceeds MAX_MARKET_CAP {}",
                self.min_market_cap,
                self.max_market_cap
            ));
        }
        Ok(())
    }

    /// Websocket endpoint for `rpc_url` unless one is configured.
    pub fn ws_url_for(&self, rpc_url: &str) -> String {
        match &self.solana_ws_url {
            Some(url) => url.clone(),
            None => rpc_url.replacen("https://", "wss://", 1).replacen("http://", "ws://", 1),
        }
    }

    pub fn sell_interval(&self) -> Duration {
        Duration::from_millis(self.sell_interval_ms)
    }

    pub fn price_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.price_cache_ttl_secs)
    }

    pub fn exit_rules(&self) -> ExitRules {
        ExitRules {
            stop_loss_pct: self.stop_loss_percent,
            levels: self.sell_levels.clone(),
            trailing_pct: self.trailing_stop_percent,
            trailing_sell_pct: self.trailing_sell_percent,
            allow_trailing_with_levels: self.allow_trailing_with_levels,
        }
    }

    pub fn order_config(&self) -> OrderConfig {
        OrderConfig {
            max_fee: self.max_fee_micro_lamports,
            fallback_fee: self.fallback_fee_micro_lamports,
            retry_interval: Duration::from_millis(self.order_retry_ms),
            confirm_timeout: Duration::from_secs(self.confirm_timeout_secs),
            ..OrderConfig::default()
        }
    }

    pub fn position_settings(&self, slippage_pct: f64) -> PositionSettings {
        PositionSettings {
            slippage_pct,
            sell_max_attempts: self.sell_max_attempts,
            dust_threshold: self.dust_threshold,
            ..PositionSettings::default()
        }
    }

    pub fn filter_args(&self) -> FilterArgs {
        FilterArgs {
            min_market_cap: self.min_market_cap,
            max_market_cap: self.max_market_cap,
            min_holder_count: self.min_holder_count,
            max_top_holder_pct: self.max_top_holder_percent,
            min_volume: self.min_volume,
            min_buys: self.min_buys,
            dex_interval: self.dex_interval,
        }
    }

    pub fn filter_gate(&self) -> FilterGate {
        FilterGate {
            check_interval: Duration::from_millis(self.filter_check_interval_ms),
            check_duration: Duration::from_millis(self.filter_check_duration_ms),
            consecutive_match_count: self.consecutive_match_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_listing_profile() {
        let config = config(&[]).unwrap();
        assert_eq!(config.exit_rules(), ExitRules::default());
        assert_eq!(config.sell_interval(), Duration::from_secs(3));
        assert_eq!(config.price_cache_ttl(), Duration::from_secs(2));
        assert_eq!(config.filter_gate(), FilterGate::default());
        assert_eq!(config.filter_args(), FilterArgs::default());
        assert_eq!(config.order_config().max_fee, OrderConfig::default().max_fee);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("SELL_LEVELS", "2:50,5:25"),
            ("ALLOW_TRAILING_WITH_LEVELS", "false"),
            ("DEX_INTERVAL", "h1"),
            ("MIN_BUYS", "12"),
            ("MAX_TOP_HOLDER_PERCENT", "15"),
            ("MAX_FEE_MICRO_LAMPORTS", "100000"),
        ])
        .unwrap();
        let rules = config.exit_rules();
        assert_eq!(rules.levels.len(), 2);
        assert!(!rules.allow_trailing_with_levels);
        assert_eq!(config.filter_args().dex_interval, DexInterval::H1);
        assert_eq!(config.filter_args().min_buys, 12);
        assert_eq!(config.filter_args().max_top_holder_pct, 15.0);
        assert_eq!(config.order_config().max_fee, 100_000);
    }

    #[test]
    fn malformed_values_fail_closed() {
        assert!(config(&[("STOP_LOSS_PERCENT", "ten")]).is_err());
        assert!(config(&[("STOP_LOSS_PERCENT", "150")]).is_err());
        assert!(config(&[("MAX_TOP_HOLDER_PERCENT", "101")]).is_err());
        assert!(config(&[("SELL_LEVELS", "1.5")]).is_err());
        assert!(config(&[("DEX_INTERVAL", "d7")]).is_err());
        assert!(config(&[("ALLOW_TRAILING_WITH_LEVELS", "maybe")]).is_err());
        assert!(config(&[("MIN_MARKET_CAP", "50000"), ("MAX_MARKET_CAP", "10000")]).is_err());
    }

    #[test]
    fn websocket_url_follows_rpc_scheme() {
        let derived = config(&[]).unwrap();
        assert_eq!(derived.ws_url_for("https://rpc.example"), "wss://rpc.example");
        assert_eq!(derived.ws_url_for("http://127.0.0.1:8899"), "ws://127.0.0.1:8899");

        let explicit = config(&[("SOLANA_WS_URL", "wss://ws.example")]).unwrap();
        assert_eq!(explicit.ws_url_for("https://rpc.example"), "wss://ws.example");
    }
}
