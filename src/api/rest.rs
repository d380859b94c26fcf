//! Binance spot REST client
//!
//! Only the public market-data endpoints are used. Credentials are optional;
//! when present the API key is sent so requests count against the account's
//! rate limits instead of the caller's IP.

use crate::api::models::{ApiError, RawKline};
use crate::config::ExchangeConfig;
use crate::data::{Candle, Timeframe};
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Largest page the klines endpoint serves
pub const MAX_KLINES_LIMIT: usize = 1000;

pub struct BinanceRestClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    min_request_interval: Duration,
    last_request: Instant,
}

impl BinanceRestClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let min_request_interval = Duration::from_millis(config.request_delay_ms);

        match (&config.api_key, &config.api_secret) {
            (Some(_), _) => debug!("Sending API key with market data requests"),
            (None, Some(_)) => warn!("API secret configured without a key; requests stay anonymous"),
            (None, None) => debug!("No API key configured; using anonymous rate limits"),
        }

        Ok(Self {
            client,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            min_request_interval,
            last_request: Instant::now() - min_request_interval,
        })
    }

    /// Wait for rate limiting if necessary
    async fn rate_limit(&mut self) {
        let elapsed = self.last_request.elapsed();
        if elapsed < self.min_request_interval {
            tokio::time::sleep(self.min_request_interval - elapsed).await;
        }
        self.last_request = Instant::now();
    }

    async fn public_request<T: DeserializeOwned>(
        &mut self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.rate_limit().await;

        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} with params: {:?}", path, params);

        let mut request = self.client.get(&url).query(params);
        if let Some(key) = &self.api_key {
            request = request.header("X-MBX-APIKEY", key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Request to {} failed", path))?;

        let status = response.status();
        let body = response.text().await?;

        debug!(
            "Response {} - {}",
            status,
            body.chars().take(200).collect::<String>()
        );

        if !status.is_success() {
            return Err(match serde_json::from_str::<ApiError>(&body) {
                Ok(api_err) => {
                    error!("Binance API error {}: {}", api_err.code, api_err.msg);
                    anyhow!(
                        "Binance API error {} (HTTP {}): {}",
                        api_err.code,
                        status,
                        api_err.msg
                    )
                }
                Err(_) => anyhow!("API request failed with status {}: {}", status, body),
            });
        }

        serde_json::from_str(&body).with_context(|| format!("Failed to parse {} response", path))
    }

    /// One page of klines with open time in `[start_ms, end_ms]`
    pub async fn get_klines(
        &mut self,
        symbol: &str,
        interval: Timeframe,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.as_str().to_string()),
            ("limit", limit.min(MAX_KLINES_LIMIT).to_string()),
        ];
        if let Some(start) = start_ms {
            params.push(("startTime", start.to_string()));
        }
        if let Some(end) = end_ms {
            params.push(("endTime", end.to_string()));
        }

        let raw: Vec<RawKline> = self.public_request("/api/v3/klines", &params).await?;

        let candles = raw
            .into_iter()
            .map(Candle::try_from)
            .collect::<Result<Vec<_>>>()
            .context("Malformed kline row")?;

        debug!(
            "Fetched {} klines for {} interval={}",
            candles.len(),
            symbol,
            interval
        );
        Ok(candles)
    }
}
