use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::rate_limit::{self, DirectLimiter};
use crate::api::PriceQuotes;
use crate::error::{SniperError, SniperResult};

const BIRDEYE_BASE_URL: &str = "https://public-api.birdeye.so";
const REQUESTS_PER_MINUTE: u32 = 800;
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

#[derive(Clone)]
pub struct BirdeyeClient {
    api_key: String,
    base_url: String,
    client: Client,
    limiter: Arc<DirectLimiter>,
}

// --- Response Structs ---

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct PriceData {
    value: f64,
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    #[serde(default)]
    items: Vec<PricePoint>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub unix_time: i64,
    pub value: f64,
}

impl PricePoint {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.unix_time, 0).single()
    }
}

impl BirdeyeClient {
    pub fn new(api_key: &str) -> SniperResult<Self> {
        Self::with_base_url(api_key, BIRDEYE_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> SniperResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| SniperError::ConfigError(format!("Failed to create HTTP client for Birdeye: {}", e)))?;
        Ok(Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            limiter: rate_limit::per_minute(REQUESTS_PER_MINUTE),
        })
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, endpoint: &str, query: &[(&str, String)]) -> SniperResult<T> {
        self.limiter.until_ready().await;
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("Birdeye request {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .header("x-chain", "solana")
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!("Birdeye {} error: {} - {}", endpoint, status, error_text);
            return Err(SniperError::ApiError(format!("birdeye {} returned {}", endpoint, status)));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| SniperError::DecodeError(format!("birdeye {}: {}", endpoint, e)))?;
        match envelope.data {
            Some(data) if envelope.success => Ok(data),
            _ => Err(SniperError::ApiError(format!("birdeye {} reported no data", endpoint))),
        }
    }

    /// Spot USD price of a token from `/defi/price`.
    pub async fn get_price(&self, address: &str) -> SniperResult<f64> {
        let data: PriceData = self
            .get("/defi/price", &[("address", address.to_string())])
            .await?;
        if !data.value.is_finite() || data.value <= 0.0 {
            return Err(SniperError::PriceUnavailable(address.to_string()));
        }
        Ok(data.value)
    }

    /// Historical USD prices at `interval` resolution (`1m`, `5m`, `1H`, ...).
    pub async fn price_history(
        &self,
        mint: &Pubkey,
        interval: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SniperResult<Vec<PricePoint>> {
        let data: HistoryData = self
            .get(
                "/defi/history_price",
                &[
                    ("address", mint.to_string()),
                    ("address_type", "token".to_string()),
                    ("type", interval.to_string()),
                    ("time_from", from.timestamp().to_string()),
                    ("time_to", to.timestamp().to_string()),
                ],
            )
            .await?;
        Ok(data.items)
    }
}

#[async_trait]
impl PriceQuotes for BirdeyeClient {
    async fn price_usd(&self, mint: &Pubkey) -> SniperResult<f64> {
        self.get_price(&mint.to_string()).await
    }

    async fn sol_price_usd(&self) -> SniperResult<f64> {
        self.get_price(SOL_MINT).await
    }
}
