use once_cell::sync::Lazy;
use regex::Regex;
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;

// Patterns are tried in order; the first one yielding a valid address wins.
static DEXSCREENER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https://dexscreener\.com/solana/(\w+)").expect("Invalid dexscreener regex"));

static DEXTOOLS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://(?:www\.)?dextools\.io/app/solana/pair-explorer/(\w+)").expect("Invalid dextools regex")
});

static BIRDEYE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https://birdeye\.so/token/(\w+)\?chain=solana").expect("Invalid birdeye regex"));

static ADDRESS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[1-9A-HJ-NP-Za-km-z]{32,44}").expect("Invalid address regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    Dexscreener,
    Dextools,
    Birdeye,
    Address,
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dexscreener => "dexscreener link",
            Self::Dextools => "dextools link",
            Self::Birdeye => "birdeye link",
            Self::Address => "contract address",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    pub source: SignalSource,
    pub mint: Pubkey,
}

fn from_link(pattern: &Regex, message: &str) -> Option<Pubkey> {
    pattern
        .captures_iter(message)
        .filter_map(|c| c.get(1))
        .find_map(|m| Pubkey::from_str(m.as_str()).ok())
}

/// Extracts the first token address a chat message points at.
pub fn parse_signal(message: &str) -> Option<Signal> {
    let links = [
        (SignalSource::Dexscreener, &*DEXSCREENER_PATTERN),
        (SignalSource::Dextools, &*DEXTOOLS_PATTERN),
        (SignalSource::Birdeye, &*BIRDEYE_PATTERN),
    ];
    for (source, pattern) in links {
        if let Some(mint) = from_link(pattern, message) {
            return Some(Signal { source, mint });
        }
    }

    ADDRESS_PATTERN
        .find_iter(message)
        .find_map(|m| Pubkey::from_str(m.as_str()).ok())
        .map(|mint| Signal {
            source: SignalSource::Address,
            mint,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINT: &str = "GJaMqbyKJ9FGimoL9dHfuNd8vGvi83Ew4d9MHdFbpump";
    const OTHER: &str = "5nhkkXd78LcyFSsFAGucmjDbmWkcUkgY9WQsnsvNpump";

    fn mint(s: &str) -> Pubkey {
        Pubkey::from_str(s).unwrap()
    }

    #[test]
    fn recognises_each_link_kind() {
        let cases = [
            (format!("ape https://dexscreener.com/solana/{} now", MINT), SignalSource::Dexscreener),
            (format!("https://www.dextools.io/app/solana/pair-explorer/{}", MINT), SignalSource::Dextools),
            (format!("chart: https://birdeye.so/token/{}?chain=solana", MINT), SignalSource::Birdeye),
            (format!("CA: {}", MINT), SignalSource::Address),
        ];
        for (message, source) in cases {
            assert_eq!(parse_signal(&message), Some(Signal { source, mint: mint(MINT) }), "{}", message);
        }
    }

    #[test]
    fn links_win_over_bare_addresses() {
        let message = format!("{} also https://birdeye.so/token/{}?chain=solana", OTHER, MINT);
        let signal = parse_signal(&message).unwrap();
        assert_eq!(signal.source, SignalSource::Birdeye);
        assert_eq!(signal.mint, mint(MINT));
    }

    #[test]
    fn skips_candidates_that_are_not_keys() {
        // 32+ base58 chars that decode to more than 32 bytes
        let junk = "z".repeat(44);
        let message = format!("{} then {}", junk, MINT);
        assert_eq!(parse_signal(&message).map(|s| s.mint), Some(mint(MINT)));
        assert_eq!(parse_signal("gm, no alpha today"), None);
    }
}
