use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::rate_limit::{self, DirectLimiter};
use crate::api::PairStats;
use crate::error::{SniperError, SniperResult};

const DEXSCREENER_BASE_URL: &str = "https://api.dexscreener.com/latest/dex";
const REQUESTS_PER_MINUTE: u32 = 300;
const MAX_ADDRESSES_PER_REQUEST: usize = 30;

/// Rolling windows dexscreener reports volume and txns over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DexInterval {
    M5,
    H1,
    H6,
    H24,
}

impl DexInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M5 => "m5",
            Self::H1 => "h1",
            Self::H6 => "h6",
            Self::H24 => "h24",
        }
    }
}

impl fmt::Display for DexInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DexInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m5" => Ok(Self::M5),
            "h1" => Ok(Self::H1),
            "h6" => Ok(Self::H6),
            "h24" => Ok(Self::H24),
            other => Err(format!("unknown dex interval '{}' (m5|h1|h6|h24)", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairActivity {
    pub volume: f64,
    pub buys: u64,
}

// --- Response Structs ---

#[derive(Debug, Deserialize)]
struct PairsResponse {
    pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pair {
    pub pair_address: String,
    pub base_token: PairToken,
    #[serde(default)]
    pub volume: HashMap<String, f64>,
    #[serde(default)]
    pub txns: HashMap<String, TxnCounts>,
    pub price_usd: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairToken {
    pub address: String,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TxnCounts {
    #[serde(default)]
    pub buys: u64,
    #[serde(default)]
    pub sells: u64,
}

impl Pair {
    pub fn activity(&self, interval: DexInterval) -> PairActivity {
        let key = interval.as_str();
        PairActivity {
            volume: self.volume.get(key).copied().unwrap_or(0.0),
            buys: self.txns.get(key).map(|t| t.buys).unwrap_or(0),
        }
    }
}

#[derive(Clone)]
pub struct DexscreenerClient {
    base_url: String,
    client: Client,
    limiter: Arc<DirectLimiter>,
}

impl DexscreenerClient {
    pub fn new() -> SniperResult<Self> {
        Self::with_base_url(DEXSCREENER_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> SniperResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SniperError::ConfigError(format!("Failed to create HTTP client for DexScreener: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            limiter: rate_limit::per_minute(REQUESTS_PER_MINUTE),
        })
    }

    /// Looks up pairs by pair address, 30 per request. Keyed by pair address.
    pub async fn get_pairs(&self, pairs: &[Pubkey]) -> SniperResult<HashMap<String, Pair>> {
        let mut found = HashMap::new();
        for chunk in pairs.chunks(MAX_ADDRESSES_PER_REQUEST) {
            let csv = chunk.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",");
            let url = format!("{}/pairs/solana/{}", self.base_url, csv);

            self.limiter.until_ready().await;
            debug!("Fetching {} pairs from DexScreener", chunk.len());
            let response = self.client.get(&url).send().await?;
            if !response.status().is_success() {
                let status = response.status();
                warn!("DexScreener pairs error: {}", status);
                return Err(SniperError::ApiError(format!("dexscreener returned {}", status)));
            }

            let body: PairsResponse = response
                .json()
                .await
                .map_err(|e| SniperError::DecodeError(format!("dexscreener pairs: {}", e)))?;
            for pair in body.pairs.unwrap_or_default() {
                found.insert(pair.pair_address.clone(), pair);
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl PairStats for DexscreenerClient {
    async fn pair_activity(&self, pair: &Pubkey, interval: DexInterval) -> SniperResult<PairActivity> {
        let pairs = self.get_pairs(std::slice::from_ref(pair)).await?;
        pairs
            .get(&pair.to_string())
            .map(|p| p.activity(interval))
            .ok_or_else(|| SniperError::ApiError(format!("dexscreener has no pair {}", pair)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair_json(address: &Pubkey, volume_m5: f64, buys_m5: u64) -> String {
        format!(
            r#"{{"chainId":"solana","pairAddress":"{}","baseToken":{{"address":"{}","symbol":"X"}},
                "volume":{{"m5":{},"h1":{}}},"txns":{{"m5":{{"buys":{},"sells":1}},"h1":{{"buys":99,"sells":2}}}},
                "priceUsd":"0.001"}}"#,
            address,
            Pubkey::new_unique(),
            volume_m5,
            volume_m5 * 10.0,
            buys_m5
        )
    }

    #[test]
    fn intervals_parse() {
        assert_eq!("h24".parse::<DexInterval>().unwrap(), DexInterval::H24);
        assert_eq!("M5".parse::<DexInterval>().unwrap(), DexInterval::M5);
        assert!("d1".parse::<DexInterval>().is_err());
    }

    #[tokio::test]
    async fn reads_activity_for_interval() {
        let mut server = mockito::Server::new_async().await;
        let pair = Pubkey::new_unique();
        server
            .mock("GET", format!("/pairs/solana/{}", pair).as_str())
            .with_status(200)
            .with_body(format!(r#"{{"schemaVersion":"1.0.0","pairs":[{}]}}"#, pair_json(&pair, 1200.5, 14)))
            .create_async()
            .await;

        let client = DexscreenerClient::with_base_url(&server.url()).unwrap();
        let m5 = client.pair_activity(&pair, DexInterval::M5).await.unwrap();
        assert_eq!(m5, PairActivity { volume: 1200.5, buys: 14 });
        let h6 = client.pair_activity(&pair, DexInterval::H6).await.unwrap();
        assert_eq!(h6, PairActivity::default());
    }

    #[tokio::test]
    async fn batches_thirty_addresses_per_request() {
        let mut server = mockito::Server::new_async().await;
        let pairs: Vec<Pubkey> = (0..31).map(|_| Pubkey::new_unique()).collect();
        let mock = server
            .mock("GET", mockito::Matcher::Regex(r"^/pairs/solana/".into()))
            .with_status(200)
            .with_body(r#"{"pairs":null}"#)
            .expect(2)
            .create_async()
            .await;

        let client = DexscreenerClient::with_base_url(&server.url()).unwrap();
        let found = client.get_pairs(&pairs).await.unwrap();
        assert!(found.is_empty());
        mock.assert_async().await;

        let err = client.pair_activity(&pairs[0], DexInterval::M5).await.unwrap_err();
        assert!(matches!(err, SniperError::ApiError(_)));
    }
}
