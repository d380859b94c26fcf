//! Column-oriented OHLCV input for the bar-series engine

use crate::convert::IndexedFrame;
use anyhow::{anyhow, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    /// Bar open times, unix millis
    pub index: Vec<i64>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl BarSeries {
    /// Needs a timestamp index and `Open/High/Low/Close`; `Volume` is optional
    pub fn from_frame(frame: &IndexedFrame) -> Result<Self> {
        let index = frame
            .index_millis()
            .ok_or_else(|| anyhow!("Data index must be timestamps (no timestamp column)"))?;

        let names = frame.column_names();
        let mut missing: Vec<&str> = ["Open", "High", "Low", "Close"]
            .into_iter()
            .filter(|c| !names.iter().any(|n| n == c))
            .collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            return Err(anyhow!(
                "Data must contain columns 'Open', 'High', 'Low', 'Close'; missing {:?}",
                missing
            ));
        }

        let volume = if names.iter().any(|n| n == "Volume") {
            frame.f64_column("Volume")?
        } else {
            vec![f64::NAN; index.len()]
        };

        Self::new(
            index,
            frame.f64_column("Open")?,
            frame.f64_column("High")?,
            frame.f64_column("Low")?,
            frame.f64_column("Close")?,
            volume,
        )
    }

    pub fn new(
        index: Vec<i64>,
        open: Vec<f64>,
        high: Vec<f64>,
        low: Vec<f64>,
        close: Vec<f64>,
        volume: Vec<f64>,
    ) -> Result<Self> {
        let n = index.len();
        if [open.len(), high.len(), low.len(), close.len(), volume.len()]
            .iter()
            .any(|len| *len != n)
        {
            return Err(anyhow!("OHLCV columns differ in length"));
        }
        if open
            .iter()
            .chain(&high)
            .chain(&low)
            .chain(&close)
            .any(|v| v.is_nan())
        {
            return Err(anyhow!("Some OHLC values are missing (NaN)"));
        }
        if index.windows(2).any(|w| w[0] >= w[1]) {
            return Err(anyhow!("Data index is not strictly ascending"));
        }

        Ok(Self {
            index,
            open,
            high,
            low,
            close,
            volume,
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::to_indexed_frame;
    use crate::data::{Candle, CandleLayout, CandleTable};
    use crate::storage::table_to_batch;

    #[test]
    fn test_from_converted_frame() {
        let rows = (0..4)
            .map(|i| Candle::ohlcv(i * 60_000, 1.0, 2.0, 0.5, 1.5 + i as f64, 3.0))
            .collect();
        let table = CandleTable::from_rows(CandleLayout::Ohlcv, rows).unwrap();
        let frame = to_indexed_frame(&table_to_batch(&table).unwrap()).unwrap();

        let series = BarSeries::from_frame(&frame).unwrap();
        assert_eq!(series.len(), 4);
        assert_eq!(series.index[3], 180_000);
        assert_eq!(series.close, vec![1.5, 2.5, 3.5, 4.5]);
    }

    #[test]
    fn test_rejects_nan_prices() {
        let err = BarSeries::new(
            vec![0, 1],
            vec![1.0, 1.0],
            vec![1.0, 1.0],
            vec![1.0, f64::NAN],
            vec![1.0, 1.0],
            vec![0.0, 0.0],
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing (NaN)"));
    }

    #[test]
    fn test_rejects_unsorted_index() {
        let ones = vec![1.0; 2];
        assert!(BarSeries::new(vec![5, 5], ones.clone(), ones.clone(), ones.clone(), ones.clone(), ones)
            .is_err());
    }
}
