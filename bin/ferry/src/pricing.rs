//! USD valuation through CoinMarketCap.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use ferry_core::error::{PriceError, PriceResult};
use ferry_core::ports::PriceOracle;

pub const DEFAULT_API_URL: &str = "https://pro-api.coinmarketcap.com";

/// How long a unit price is reused.
const PRICE_TTL: Duration = Duration::from_secs(300);

/// Price oracle used when no API key is configured. Every lookup fails.
pub struct DisabledOracle;

#[async_trait]
impl PriceOracle for DisabledOracle {
    async fn value_in_usd(&self, _amount: &str, _symbol: &str) -> PriceResult<f64> {
        Err(PriceError::Unavailable("no price API key configured".into()))
    }
}

/// Quotes unit prices with `/v2/tools/price-conversion` and caches them per symbol.
pub struct CoinMarketCapOracle {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    cache: RwLock<HashMap<String, (f64, Instant)>>,
}

impl CoinMarketCapOracle {
    pub fn new(api_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    async fn cached(&self, symbol: &str) -> Option<f64> {
        let cache = self.cache.read().await;
        cache
            .get(symbol)
            .filter(|(_, at)| at.elapsed() < PRICE_TTL)
            .map(|(price, _)| *price)
    }

    async fn unit_price(&self, symbol: &str) -> PriceResult<f64> {
        if let Some(price) = self.cached(symbol).await {
            return Ok(price);
        }

        let url = format!("{}/v2/tools/price-conversion", self.api_url);
        let response = self
            .client
            .get(&url)
            .header("X-CMC_PRO_API_KEY", &self.api_key)
            .query(&[("amount", "1"), ("symbol", symbol), ("convert", "USD")])
            .send()
            .await
            .map_err(|e| PriceError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| PriceError::Unavailable(e.to_string()))?;
        let body: ConversionResponse = response
            .json()
            .await
            .map_err(|e| PriceError::Unavailable(format!("invalid response: {e}")))?;

        let price = body
            .usd_price()
            .ok_or_else(|| PriceError::UnknownSymbol(symbol.to_string()))?;
        debug!(symbol, price, "Unit price fetched");

        self.cache
            .write()
            .await
            .insert(symbol.to_string(), (price, Instant::now()));
        Ok(price)
    }
}

#[async_trait]
impl PriceOracle for CoinMarketCapOracle {
    async fn value_in_usd(&self, amount: &str, symbol: &str) -> PriceResult<f64> {
        let amount: f64 = amount
            .parse()
            .map_err(|_| PriceError::InvalidAmount(amount.to_string()))?;
        if amount == 0.0 {
            return Ok(0.0);
        }
        Ok(amount * self.unit_price(symbol).await?)
    }
}

// =============================================================================
// Response format
// =============================================================================

#[derive(Debug, Deserialize)]
struct ConversionResponse {
    data: ConversionData,
}

/// A symbol query answers with a list, an id query with a single entry.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConversionData {
    Many(Vec<Conversion>),
    One(Conversion),
}

#[derive(Debug, Deserialize)]
struct Conversion {
    quote: HashMap<String, Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    price: Option<f64>,
}

impl ConversionResponse {
    fn usd_price(&self) -> Option<f64> {
        let conversion = match &self.data {
            ConversionData::Many(list) => list.first()?,
            ConversionData::One(one) => one,
        };
        conversion.quote.get("USD")?.price
    }
}
