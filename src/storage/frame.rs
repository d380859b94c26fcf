//! Arrow representation of a candle table

use crate::data::{Candle, CandleLayout, CandleTable, KlineExtras};
use anyhow::{anyhow, Context, Result};
use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

pub const TIMEZONE: &str = "UTC";

pub fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Millisecond, Some(TIMEZONE.into()))
}

fn column_type(name: &str) -> DataType {
    match name {
        "open_time" | "close_time" => timestamp_type(),
        "trades" => DataType::Int64,
        _ => DataType::Float64,
    }
}

pub fn schema(layout: CandleLayout) -> SchemaRef {
    let fields: Vec<Field> = layout
        .columns()
        .iter()
        .map(|name| Field::new(*name, column_type(name), false))
        .collect();
    Arc::new(Schema::new(fields))
}

fn timestamps(values: Vec<i64>) -> ArrayRef {
    Arc::new(TimestampMillisecondArray::from(values).with_timezone(TIMEZONE))
}

fn floats(values: Vec<f64>) -> ArrayRef {
    Arc::new(Float64Array::from(values))
}

pub fn table_to_batch(table: &CandleTable) -> Result<RecordBatch> {
    let rows = table.rows();

    let mut columns: Vec<ArrayRef> = vec![
        timestamps(rows.iter().map(|c| c.open_time).collect()),
        floats(rows.iter().map(|c| c.open).collect()),
        floats(rows.iter().map(|c| c.high).collect()),
        floats(rows.iter().map(|c| c.low).collect()),
        floats(rows.iter().map(|c| c.close).collect()),
        floats(rows.iter().map(|c| c.volume).collect()),
    ];

    if table.layout() == CandleLayout::Full {
        let extras: Vec<KlineExtras> = rows.iter().filter_map(|c| c.extras).collect();
        if extras.len() != rows.len() {
            return Err(anyhow!("Full-layout table has rows without kline extras"));
        }
        columns.push(timestamps(extras.iter().map(|e| e.close_time).collect()));
        columns.push(floats(extras.iter().map(|e| e.quote_asset_volume).collect()));
        columns.push(Arc::new(Int64Array::from(
            extras.iter().map(|e| e.trades).collect::<Vec<_>>(),
        )));
        columns.push(floats(extras.iter().map(|e| e.taker_base_vol).collect()));
        columns.push(floats(extras.iter().map(|e| e.taker_quote_vol).collect()));
    }

    RecordBatch::try_new(schema(table.layout()), columns).context("Failed to build candle batch")
}

fn typed_column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    let column = batch
        .column_by_name(name)
        .with_context(|| format!("Missing {} column", name))?;
    if column.null_count() > 0 {
        return Err(anyhow!("{} column contains {} nulls", name, column.null_count()));
    }
    column
        .as_any()
        .downcast_ref::<T>()
        .with_context(|| format!("{} column has type {}", name, column.data_type()))
}

pub fn batch_to_table(batch: &RecordBatch) -> Result<CandleTable> {
    let layout = if batch.column_by_name("close_time").is_some() {
        CandleLayout::Full
    } else {
        CandleLayout::Ohlcv
    };

    let open_time = typed_column::<TimestampMillisecondArray>(batch, "open_time")?;
    let open = typed_column::<Float64Array>(batch, "open")?;
    let high = typed_column::<Float64Array>(batch, "high")?;
    let low = typed_column::<Float64Array>(batch, "low")?;
    let close = typed_column::<Float64Array>(batch, "close")?;
    let volume = typed_column::<Float64Array>(batch, "volume")?;

    let mut rows: Vec<Candle> = (0..batch.num_rows())
        .map(|i| {
            Candle::ohlcv(
                open_time.value(i),
                open.value(i),
                high.value(i),
                low.value(i),
                close.value(i),
                volume.value(i),
            )
        })
        .collect();

    if layout == CandleLayout::Full {
        let close_time = typed_column::<TimestampMillisecondArray>(batch, "close_time")?;
        let quote = typed_column::<Float64Array>(batch, "quote_asset_volume")?;
        let trades = typed_column::<Int64Array>(batch, "trades")?;
        let taker_base = typed_column::<Float64Array>(batch, "taker_base_vol")?;
        let taker_quote = typed_column::<Float64Array>(batch, "taker_quote_vol")?;

        for (i, row) in rows.iter_mut().enumerate() {
            row.extras = Some(KlineExtras {
                close_time: close_time.value(i),
                quote_asset_volume: quote.value(i),
                trades: trades.value(i),
                taker_base_vol: taker_base.value(i),
                taker_quote_vol: taker_quote.value(i),
            });
        }
    }

    CandleTable::from_rows(layout, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ohlcv_batch_columns() {
        let table = CandleTable::from_rows(
            CandleLayout::Ohlcv,
            vec![Candle::ohlcv(0, 1.0, 2.0, 0.5, 1.5, 3.0)],
        )
        .unwrap();
        let batch = table_to_batch(&table).unwrap();

        let names: Vec<String> = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, CandleLayout::Ohlcv.columns());
        assert_eq!(batch.column(0).data_type(), &timestamp_type());
        assert_eq!(batch_to_table(&batch).unwrap(), table);
    }

    #[test]
    fn test_missing_column_reported() {
        let schema = Arc::new(Schema::new(vec![Field::new("open_time", timestamp_type(), false)]));
        let batch = RecordBatch::try_new(schema, vec![timestamps(vec![0])]).unwrap();
        let err = batch_to_table(&batch).unwrap_err();
        assert!(err.to_string().contains("Missing open column"));
    }
}
