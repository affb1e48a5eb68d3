//! Market-data gateway
//!
//! Stateless wrappers around the price/market providers. Each call is
//! independent (no caching) and returns the provider's native JSON or a
//! tagged error; the fetcher decides what a failure means for the pipeline.

use async_trait::async_trait;
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::error;

use crate::error::AgentError;
use crate::Result;

const COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const COINMARKETCAP_BASE_URL: &str = "https://pro-api.coinmarketcap.com/v1";

/// The four market-data operations the fetcher can dispatch.
#[async_trait]
pub trait MarketGateway: Send + Sync {
    /// Current price, market cap, volume and 24h change for a set of coins.
    async fn current_price(&self, coin_ids: &[String], currency: &str) -> Result<Value>;

    /// Historical prices and volumes for one coin.
    async fn historical_prices(
        &self,
        coin_id: &str,
        currency: &str,
        days: u32,
        interval: &str,
    ) -> Result<Value>;

    /// Top coins by market cap with 24h change.
    async fn top_coins(&self, limit: u32, currency: &str) -> Result<Value>;

    /// Top listings from the secondary provider (CoinMarketCap).
    async fn provider2_latest(&self, limit: u32, currency: &str) -> Result<Value>;
}

/// HTTP-backed gateway over CoinGecko and CoinMarketCap.
pub struct HttpMarketGateway {
    client: reqwest::Client,
    coingecko_base: String,
    coinmarketcap_base: String,
    cmc_api_key: String,
}

impl HttpMarketGateway {
    pub fn new(cmc_api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            coingecko_base: COINGECKO_BASE_URL.to_string(),
            coinmarketcap_base: COINMARKETCAP_BASE_URL.to_string(),
            cmc_api_key,
        }
    }

    pub fn from_env() -> Self {
        Self::new(env::var("CMC_API_KEY").unwrap_or_default())
    }

    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, &str)],
    ) -> Result<Value> {
        let mut request = self.client.get(url).query(query);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(|e| {
            error!("Market data request failed for {}: {}", url, e);
            AgentError::MarketDataError(format!("request failed for {}: {}", url, e))
        })?;

        response.json::<Value>().await.map_err(|e| {
            error!("Invalid JSON from {}: {}", url, e);
            AgentError::MarketDataError(format!("invalid JSON from {}: {}", url, e))
        })
    }
}

#[async_trait]
impl MarketGateway for HttpMarketGateway {
    async fn current_price(&self, coin_ids: &[String], currency: &str) -> Result<Value> {
        let url = format!("{}/simple/price", self.coingecko_base);
        let data = self
            .get_json(
                &url,
                &[
                    ("ids", coin_ids.join(",")),
                    ("vs_currencies", currency.to_string()),
                    ("include_market_cap", "true".to_string()),
                    ("include_24hr_vol", "true".to_string()),
                    ("include_24hr_change", "true".to_string()),
                ],
                &[],
            )
            .await?;

        if !data.is_object() {
            return Err(AgentError::MarketDataError(format!(
                "unexpected response shape from simple/price: {}",
                data
            )));
        }
        Ok(data)
    }

    async fn historical_prices(
        &self,
        coin_id: &str,
        currency: &str,
        days: u32,
        interval: &str,
    ) -> Result<Value> {
        let url = format!("{}/coins/{}/market_chart", self.coingecko_base, coin_id);
        let data = self
            .get_json(
                &url,
                &[
                    ("vs_currency", currency.to_string()),
                    ("days", days.to_string()),
                    ("interval", interval.to_string()),
                ],
                &[],
            )
            .await?;

        if !data.is_object() || data.get("error").is_some() {
            return Err(AgentError::MarketDataError(format!(
                "unexpected response shape from market_chart: {}",
                data
            )));
        }
        Ok(data)
    }

    async fn top_coins(&self, limit: u32, currency: &str) -> Result<Value> {
        let url = format!("{}/coins/markets", self.coingecko_base);
        let data = self
            .get_json(
                &url,
                &[
                    ("vs_currency", currency.to_string()),
                    ("order", "market_cap_desc".to_string()),
                    ("per_page", limit.to_string()),
                    ("page", "1".to_string()),
                    ("sparkline", "false".to_string()),
                    ("price_change_percentage", "24h".to_string()),
                ],
                &[],
            )
            .await?;

        if !data.is_array() {
            return Err(AgentError::MarketDataError(format!(
                "unexpected response shape from coins/markets: {}",
                data
            )));
        }
        Ok(data)
    }

    async fn provider2_latest(&self, limit: u32, currency: &str) -> Result<Value> {
        let url = format!(
            "{}/cryptocurrency/listings/latest",
            self.coinmarketcap_base
        );
        let data = self
            .get_json(
                &url,
                &[
                    ("start", "1".to_string()),
                    ("limit", limit.to_string()),
                    ("convert", currency.to_string()),
                ],
                &[
                    ("Accepts", "application/json"),
                    ("X-CMC_PRO_API_KEY", self.cmc_api_key.as_str()),
                ],
            )
            .await?;

        // CoinMarketCap wraps the payload; everything useful lives in "data".
        match data.get("data") {
            Some(inner) => Ok(inner.clone()),
            None => Err(AgentError::MarketDataError(format!(
                "unexpected response shape from listings/latest: {}",
                data
            ))),
        }
    }
}
