use crate::data::{Candle, KlineExtras};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One row of the klines endpoint.
///
/// `[open_time, open, high, low, close, volume, close_time, quote_volume,
/// trades, taker_base_volume, taker_quote_volume, ignore]`, with prices and
/// volumes encoded as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct RawKline(
    pub i64,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub i64,
    pub String,
    pub i64,
    pub String,
    pub String,
    pub serde_json::Value,
);

fn parse_f64(value: &str, field: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .with_context(|| format!("Invalid {} value: {:?}", field, value))
}

impl TryFrom<RawKline> for Candle {
    type Error = anyhow::Error;

    fn try_from(raw: RawKline) -> Result<Self> {
        Ok(Candle {
            open_time: raw.0,
            open: parse_f64(&raw.1, "open")?,
            high: parse_f64(&raw.2, "high")?,
            low: parse_f64(&raw.3, "low")?,
            close: parse_f64(&raw.4, "close")?,
            volume: parse_f64(&raw.5, "volume")?,
            extras: Some(KlineExtras {
                close_time: raw.6,
                quote_asset_volume: parse_f64(&raw.7, "quote_asset_volume")?,
                trades: raw.8,
                taker_base_vol: parse_f64(&raw.9, "taker_base_vol")?,
                taker_quote_vol: parse_f64(&raw.10, "taker_quote_vol")?,
            }),
        })
    }
}

/// `[timestamp, open, high, low, close, volume]` as returned by the unified API
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcvRow(pub i64, pub f64, pub f64, pub f64, pub f64, pub f64);

impl From<OhlcvRow> for Candle {
    fn from(row: OhlcvRow) -> Self {
        Candle::ohlcv(row.0, row.1, row.2, row.3, row.4, row.5)
    }
}

impl From<&Candle> for OhlcvRow {
    fn from(c: &Candle) -> Self {
        OhlcvRow(c.open_time, c.open, c.high, c.low, c.close, c.volume)
    }
}

/// Error payload on non-2xx responses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub msg: String,
}
