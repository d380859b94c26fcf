use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column set carried by a candle table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandleLayout {
    /// Everything the klines endpoint returns (minus its unused trailing field)
    Full,
    /// Timestamp plus OHLCV only
    Ohlcv,
}

impl CandleLayout {
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            CandleLayout::Full => &[
                "open_time",
                "open",
                "high",
                "low",
                "close",
                "volume",
                "close_time",
                "quote_asset_volume",
                "trades",
                "taker_base_vol",
                "taker_quote_vol",
            ],
            CandleLayout::Ohlcv => &["open_time", "open", "high", "low", "close", "volume"],
        }
    }
}

/// Fields only the direct klines endpoint provides
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KlineExtras {
    pub close_time: i64,
    pub quote_asset_volume: f64,
    pub trades: i64,
    pub taker_base_vol: f64,
    pub taker_quote_vol: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open, unix milliseconds
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub extras: Option<KlineExtras>,
}

impl Candle {
    pub fn ohlcv(open_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            extras: None,
        }
    }

    pub fn layout(&self) -> CandleLayout {
        if self.extras.is_some() {
            CandleLayout::Full
        } else {
            CandleLayout::Ohlcv
        }
    }

    pub fn open_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.open_time).single()
    }
}

/// Candles ordered by open time, all sharing one layout
#[derive(Debug, Clone, PartialEq)]
pub struct CandleTable {
    layout: CandleLayout,
    rows: Vec<Candle>,
}

impl CandleTable {
    pub fn empty(layout: CandleLayout) -> Self {
        Self {
            layout,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(layout: CandleLayout, rows: Vec<Candle>) -> Result<Self> {
        if let Some(bad) = rows.iter().find(|c| c.layout() != layout) {
            return Err(anyhow!(
                "Candle at {} has layout {:?}, table expects {:?}",
                bad.open_time,
                bad.layout(),
                layout
            ));
        }
        Ok(Self { layout, rows })
    }

    pub fn layout(&self) -> CandleLayout {
        self.layout
    }

    pub fn rows(&self) -> &[Candle] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.rows.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.rows.last()
    }

    pub fn column_names(&self) -> &'static [&'static str] {
        self.layout.columns()
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.layout.columns().len())
    }

    pub fn head(&self, n: usize) -> &[Candle] {
        &self.rows[..n.min(self.rows.len())]
    }

    pub fn is_strictly_ascending(&self) -> bool {
        self.rows.windows(2).all(|w| w[0].open_time < w[1].open_time)
    }

    /// Append a page, keeping only rows strictly after the current last row
    /// and strictly before `end_ms`. Returns how many rows were kept.
    pub fn append_page(&mut self, page: Vec<Candle>, end_ms: i64) -> Result<usize> {
        let mut cursor = self.last().map(|c| c.open_time);
        let mut kept = 0;

        for candle in page {
            if candle.layout() != self.layout {
                return Err(anyhow!(
                    "Page row at {} has layout {:?}, table expects {:?}",
                    candle.open_time,
                    candle.layout(),
                    self.layout
                ));
            }
            if candle.open_time >= end_ms {
                continue;
            }
            if cursor.map_or(false, |last| candle.open_time <= last) {
                continue;
            }
            cursor = Some(candle.open_time);
            self.rows.push(candle);
            kept += 1;
        }

        Ok(kept)
    }
}

impl fmt::Display for CandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (rows, cols) = self.shape();
        writeln!(f, "shape: ({}, {})", rows, cols)?;
        writeln!(
            f,
            "{:<20} {:>12} {:>12} {:>12} {:>12} {:>14}",
            "open_time", "open", "high", "low", "close", "volume"
        )?;
        for c in self.head(5) {
            let ts = c
                .open_datetime()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| c.open_time.to_string());
            writeln!(
                f,
                "{:<20} {:>12.2} {:>12.2} {:>12.2} {:>12.2} {:>14.4}",
                ts, c.open, c.high, c.low, c.close, c.volume
            )?;
        }
        if rows > 5 {
            writeln!(f, "... {} more rows", rows - 5)?;
        }
        Ok(())
    }
}
