//! Single-file Parquet snapshot of a candle table
//!
//! `save` always replaces the previous snapshot; there is no merge, staleness
//! check or checksum.

use crate::data::CandleTable;
use crate::storage::frame::{batch_to_table, table_to_batch};
use anyhow::{anyhow, Context, Result};
use arrow::compute::concat_batches;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::Path;
use tracing::info;

pub fn save(table: &CandleTable, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let batch = table_to_batch(table)?;

    let file = File::create(path)
        .with_context(|| format!("Failed to create cache file {}", path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    info!("Saved {} candles to {}", table.len(), path.display());
    Ok(())
}

pub fn load(path: &Path) -> Result<CandleTable> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open cache file {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("{} is not a readable parquet file", path.display()))?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;

    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    let batch = concat_batches(&schema, &batches)?;
    let table = batch_to_table(&batch)?;
    if !table.is_strictly_ascending() {
        return Err(anyhow!(
            "{} is not ordered by strictly ascending open time",
            path.display()
        ));
    }

    info!("Loaded {} candles from {}", table.len(), path.display());
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Candle, CandleLayout, KlineExtras};
    use tempfile::tempdir;

    fn full_table(n: usize) -> CandleTable {
        let rows = (0..n)
            .map(|i| {
                let ts = i as i64 * 3_600_000;
                let p = 40_000.0 + i as f64;
                Candle {
                    extras: Some(KlineExtras {
                        close_time: ts + 3_599_999,
                        quote_asset_volume: p * 2.0,
                        trades: i as i64 * 10,
                        taker_base_vol: 1.0,
                        taker_quote_vol: p,
                    }),
                    ..Candle::ohlcv(ts, p, p + 5.0, p - 5.0, p + 1.0, 2.0)
                }
            })
            .collect();
        CandleTable::from_rows(CandleLayout::Full, rows).unwrap()
    }

    #[test]
    fn test_round_trip_full_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("BTCUSDT_1h_tmp_365days.parquet");
        let table = full_table(48);

        save(&table, &path).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.shape(), table.shape());
        assert_eq!(loaded.column_names(), table.column_names());
        assert_eq!(loaded, table);
    }

    #[test]
    fn test_round_trip_ohlcv_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ohlcv.parquet");
        let rows = (0..5)
            .map(|i| Candle::ohlcv(i * 60_000, 1.0, 2.0, 0.5, 1.5, 3.0))
            .collect();
        let table = CandleTable::from_rows(CandleLayout::Ohlcv, rows).unwrap();

        save(&table, &path).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.shape(), (5, 6));
        assert_eq!(loaded.layout(), CandleLayout::Ohlcv);
    }

    #[test]
    fn test_save_replaces_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.parquet");

        save(&full_table(10), &path).unwrap();
        save(&full_table(3), &path).unwrap();

        assert_eq!(load(&path).unwrap().len(), 3);
    }

    #[test]
    fn test_empty_table_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.parquet");

        save(&CandleTable::empty(CandleLayout::Full), &path).unwrap();
        let loaded = load(&path).unwrap();

        assert!(loaded.is_empty());
        assert_eq!(loaded.shape(), (0, 11));
    }

    #[test]
    fn test_load_rejects_unordered_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unordered.parquet");
        let rows = vec![
            Candle::ohlcv(60_000, 1.0, 2.0, 0.5, 1.5, 3.0),
            Candle::ohlcv(0, 1.0, 2.0, 0.5, 1.5, 3.0),
        ];
        save(&CandleTable::from_rows(CandleLayout::Ohlcv, rows).unwrap(), &path).unwrap();

        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("strictly ascending"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = load(&dir.path().join("nope.parquet")).unwrap_err();
        assert!(err.to_string().contains("Failed to open cache file"));
    }
}
