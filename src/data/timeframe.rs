//! Candle intervals in the exchange's interval grammar

use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H8,
    H12,
    D1,
    D3,
    W1,
    Mo1,
}

impl Timeframe {
    /// Interval string as the klines endpoint expects it
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::D3 => "3d",
            Timeframe::W1 => "1w",
            Timeframe::Mo1 => "1M",
        }
    }

    /// Nominal bar length. Months are taken as 30 days.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Timeframe::M1 => MINUTE_MS,
            Timeframe::M3 => 3 * MINUTE_MS,
            Timeframe::M5 => 5 * MINUTE_MS,
            Timeframe::M15 => 15 * MINUTE_MS,
            Timeframe::M30 => 30 * MINUTE_MS,
            Timeframe::H1 => HOUR_MS,
            Timeframe::H2 => 2 * HOUR_MS,
            Timeframe::H4 => 4 * HOUR_MS,
            Timeframe::H6 => 6 * HOUR_MS,
            Timeframe::H8 => 8 * HOUR_MS,
            Timeframe::H12 => 12 * HOUR_MS,
            Timeframe::D1 => DAY_MS,
            Timeframe::D3 => 3 * DAY_MS,
            Timeframe::W1 => 7 * DAY_MS,
            Timeframe::Mo1 => 30 * DAY_MS,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.duration_ms())
    }

    /// Step and aggregation unit for bar-type strings, e.g. `(1, "HOUR")`
    pub fn bar_spec(&self) -> (u32, &'static str) {
        match self {
            Timeframe::M1 => (1, "MINUTE"),
            Timeframe::M3 => (3, "MINUTE"),
            Timeframe::M5 => (5, "MINUTE"),
            Timeframe::M15 => (15, "MINUTE"),
            Timeframe::M30 => (30, "MINUTE"),
            Timeframe::H1 => (1, "HOUR"),
            Timeframe::H2 => (2, "HOUR"),
            Timeframe::H4 => (4, "HOUR"),
            Timeframe::H6 => (6, "HOUR"),
            Timeframe::H8 => (8, "HOUR"),
            Timeframe::H12 => (12, "HOUR"),
            Timeframe::D1 => (1, "DAY"),
            Timeframe::D3 => (3, "DAY"),
            Timeframe::W1 => (1, "WEEK"),
            Timeframe::Mo1 => (1, "MONTH"),
        }
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        // "1M" (month) and "1m" (minute) differ only by case
        let tf = match s.trim() {
            "1m" => Timeframe::M1,
            "3m" => Timeframe::M3,
            "5m" => Timeframe::M5,
            "15m" => Timeframe::M15,
            "30m" => Timeframe::M30,
            "1h" => Timeframe::H1,
            "2h" => Timeframe::H2,
            "4h" => Timeframe::H4,
            "6h" => Timeframe::H6,
            "8h" => Timeframe::H8,
            "12h" => Timeframe::H12,
            "1d" => Timeframe::D1,
            "3d" => Timeframe::D3,
            "1w" => Timeframe::W1,
            "1M" => Timeframe::Mo1,
            other => return Err(anyhow!("Unsupported timeframe: {}", other)),
        };
        Ok(tf)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for s in ["1m", "15m", "1h", "4h", "1d", "1w", "1M"] {
            let tf: Timeframe = s.parse().unwrap();
            assert_eq!(tf.as_str(), s);
        }
    }

    #[test]
    fn test_minute_vs_month() {
        assert_eq!("1m".parse::<Timeframe>().unwrap(), Timeframe::M1);
        assert_eq!("1M".parse::<Timeframe>().unwrap(), Timeframe::Mo1);
    }

    #[test]
    fn test_unknown_rejected() {
        assert!("7h".parse::<Timeframe>().is_err());
        assert!("".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_hour_duration() {
        assert_eq!(Timeframe::H1.duration_ms(), 3_600_000);
        assert_eq!(Timeframe::H1.bar_spec(), (1, "HOUR"));
    }
}
