//! Unified exchange interface
//!
//! Speaks in market symbols (`BTC/USDT`) and interval strings instead of raw
//! exchange ids, and returns bare OHLCV rows. Candles are requested from a
//! start time forward with a page size; there is no end bound.

use crate::api::models::OhlcvRow;
use crate::api::rest::BinanceRestClient;
use crate::config::ExchangeConfig;
use crate::data::Timeframe;
use anyhow::{anyhow, Result};
use tracing::debug;

/// A spot market as addressed by the unified API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Market {
    pub symbol: String,
    pub id: String,
    pub base: String,
    pub quote: String,
}

impl Market {
    pub fn parse(symbol: &str) -> Result<Self> {
        let (base, quote) = symbol
            .split_once('/')
            .ok_or_else(|| anyhow!("Market symbol must look like BASE/QUOTE, got {:?}", symbol))?;

        let valid = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(base) || !valid(quote) {
            return Err(anyhow!("Invalid market symbol: {:?}", symbol));
        }

        let base = base.to_ascii_uppercase();
        let quote = quote.to_ascii_uppercase();
        Ok(Self {
            symbol: format!("{}/{}", base, quote),
            id: format!("{}{}", base, quote),
            base,
            quote,
        })
    }
}

pub struct UnifiedExchange {
    name: &'static str,
    rest: BinanceRestClient,
}

impl UnifiedExchange {
    pub fn binance(config: &ExchangeConfig) -> Result<Self> {
        Ok(Self {
            name: "binance",
            rest: BinanceRestClient::new(config)?,
        })
    }

    /// Fetch up to `limit` candles starting at `since` (or the most recent ones)
    pub async fn fetch_ohlcv(
        &mut self,
        symbol: &str,
        timeframe: &str,
        since: Option<i64>,
        limit: usize,
    ) -> Result<Vec<OhlcvRow>> {
        let market = Market::parse(symbol)?;
        let timeframe: Timeframe = timeframe.parse()?;

        debug!(
            "{}: fetch_ohlcv {} ({}) {} since={:?} limit={}",
            self.name, market.symbol, market.id, timeframe, since, limit
        );

        let candles = self
            .rest
            .get_klines(&market.id, timeframe, since, None, limit)
            .await?;

        Ok(candles.iter().map(OhlcvRow::from).collect())
    }
}
