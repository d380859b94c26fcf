//! Table layout conversion for the two engines
//!
//! The bar-series engine wants capitalised OHLCV columns indexed by time; the
//! event-driven node wants a list of bars stamped at their close.

use crate::backtest::node::{Bar, Instrument};
use crate::data::Timeframe;
use crate::storage::frame::timestamp_type;
use anyhow::{anyhow, Context, Result};
use arrow::array::{Array, ArrayRef, Float64Array, TimestampMillisecondArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use std::sync::Arc;

/// Columns renamed for the bar-series engine; everything else passes through
pub const COLUMN_RENAMES: [(&str, &str); 6] = [
    ("open_time", "timestamp"),
    ("open", "Open"),
    ("high", "High"),
    ("low", "Low"),
    ("close", "Close"),
    ("volume", "Volume"),
];

pub const INDEX_COLUMN: &str = "timestamp";

/// Columns the node's bar conversion cannot do without
pub const BAR_COLUMNS: [&str; 6] = ["open_time", "open", "high", "low", "close", "volume"];

fn renamed(name: &str) -> &str {
    COLUMN_RENAMES
        .iter()
        .find(|(from, _)| *from == name)
        .map(|(_, to)| *to)
        .unwrap_or(name)
}

fn as_timestamps(column: &ArrayRef) -> Result<TimestampMillisecondArray> {
    let column = if column.data_type() == &timestamp_type() {
        column.clone()
    } else {
        cast(column, &timestamp_type())
            .with_context(|| format!("Cannot read {} as timestamps", column.data_type()))?
    };
    column
        .as_any()
        .downcast_ref::<TimestampMillisecondArray>()
        .cloned()
        .ok_or_else(|| anyhow!("timestamp cast produced {}", column.data_type()))
}

/// A table whose rows are labelled by a timestamp index
#[derive(Debug, Clone)]
pub struct IndexedFrame {
    pub index: Option<TimestampMillisecondArray>,
    pub columns: RecordBatch,
}

impl IndexedFrame {
    pub fn num_rows(&self) -> usize {
        self.columns.num_rows()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Index as unix milliseconds
    pub fn index_millis(&self) -> Option<Vec<i64>> {
        self.index.as_ref().map(|idx| idx.values().to_vec())
    }

    pub fn f64_column(&self, name: &str) -> Result<Vec<f64>> {
        let column = self
            .columns
            .column_by_name(name)
            .with_context(|| format!("Missing {} column", name))?;
        let column = if column.data_type() == &DataType::Float64 {
            column.clone()
        } else {
            cast(column, &DataType::Float64)
                .with_context(|| format!("{} column is not numeric", name))?
        };
        let values = column
            .as_any()
            .downcast_ref::<Float64Array>()
            .with_context(|| format!("{} column is not Float64", name))?;
        Ok(values.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

/// Rename the fixed column set and promote `timestamp` to the index
pub fn to_indexed_frame(batch: &RecordBatch) -> Result<IndexedFrame> {
    let schema = batch.schema();
    let mut index = None;
    let mut fields = Vec::new();
    let mut columns = Vec::new();

    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        let name = renamed(field.name());
        if name == INDEX_COLUMN {
            index = Some(as_timestamps(column)?);
            continue;
        }
        fields.push(Field::new(name, field.data_type().clone(), field.is_nullable()));
        columns.push(column.clone());
    }

    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    let columns = RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)
        .context("Failed to rebuild renamed batch")?;

    Ok(IndexedFrame { index, columns })
}

/// Build node bars; each bar is stamped at its close (`open_time + timeframe`)
pub fn to_bars(batch: &RecordBatch, instrument: &Instrument, timeframe: Timeframe) -> Result<Vec<Bar>> {
    let mut missing: Vec<&str> = BAR_COLUMNS
        .iter()
        .copied()
        .filter(|name| batch.column_by_name(name).is_none())
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        return Err(anyhow!("Missing columns: {:?}", missing));
    }

    let open_time = batch
        .column_by_name("open_time")
        .map(as_timestamps)
        .transpose()?
        .context("Missing open_time column")?;

    let frame = IndexedFrame {
        index: None,
        columns: batch.clone(),
    };
    let open = frame.f64_column("open")?;
    let high = frame.f64_column("high")?;
    let low = frame.f64_column("low")?;
    let close = frame.f64_column("close")?;
    let volume = frame.f64_column("volume")?;

    let step = timeframe.duration_ms();
    (0..batch.num_rows())
        .map(|i| {
            Ok(Bar {
                open: instrument.make_price(open[i])?,
                high: instrument.make_price(high[i])?,
                low: instrument.make_price(low[i])?,
                close: instrument.make_price(close[i])?,
                volume: instrument.make_qty_f64(volume[i])?,
                ts_event: open_time.value(i) + step,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Candle, CandleLayout, CandleTable, KlineExtras};
    use crate::storage::table_to_batch;
    use rust_decimal_macros::dec;

    fn full_batch() -> RecordBatch {
        let rows = (0..3)
            .map(|i| Candle {
                extras: Some(KlineExtras {
                    close_time: i * 3_600_000 + 3_599_999,
                    quote_asset_volume: 10.0,
                    trades: 5,
                    taker_base_vol: 1.0,
                    taker_quote_vol: 2.0,
                }),
                ..Candle::ohlcv(i * 3_600_000, 100.0, 101.0, 99.0, 100.5, 7.0)
            })
            .collect();
        table_to_batch(&CandleTable::from_rows(CandleLayout::Full, rows).unwrap()).unwrap()
    }

    #[test]
    fn test_renames_fixed_set_and_indexes() {
        let frame = to_indexed_frame(&full_batch()).unwrap();

        assert_eq!(
            frame.column_names(),
            vec![
                "Open",
                "High",
                "Low",
                "Close",
                "Volume",
                "close_time",
                "quote_asset_volume",
                "trades",
                "taker_base_vol",
                "taker_quote_vol",
            ]
        );
        assert_eq!(frame.num_rows(), 3);
        assert_eq!(
            frame.index_millis().unwrap(),
            vec![0, 3_600_000, 7_200_000]
        );
        assert_eq!(frame.f64_column("Close").unwrap(), vec![100.5; 3]);
    }

    #[test]
    fn test_without_timestamp_no_index() {
        let schema = Arc::new(Schema::new(vec![Field::new("close", DataType::Float64, false)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Float64Array::from(vec![1.0, 2.0])) as ArrayRef],
        )
        .unwrap();

        let frame = to_indexed_frame(&batch).unwrap();
        assert!(frame.index.is_none());
        assert_eq!(frame.column_names(), vec!["Close"]);
    }

    #[test]
    fn test_bars_stamped_at_close() {
        let instrument = Instrument::btcusdt_binance();
        let bars = to_bars(&full_batch(), &instrument, Timeframe::H1).unwrap();

        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].ts_event, 3_600_000);
        assert_eq!(bars[2].ts_event, 3 * 3_600_000);
        assert_eq!(bars[0].close, dec!(100.50));
    }

    #[test]
    fn test_bars_report_missing_columns() {
        let schema = Arc::new(Schema::new(vec![Field::new("open", DataType::Float64, false)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Float64Array::from(vec![1.0])) as ArrayRef],
        )
        .unwrap();

        let err = to_bars(&batch, &Instrument::btcusdt_binance(), Timeframe::H1).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Missing columns: ["close", "high", "low", "open_time", "volume"]"#
        );
    }
}
