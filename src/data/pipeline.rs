//! Fetch-or-load entry point for historical candles

use crate::api::{BinanceRestClient, UnifiedExchange};
use crate::config::{Config, DownloaderKind};
use crate::data::downloader::{fetch_historical, DirectDownloader, UnifiedDownloader};
use crate::data::CandleTable;
use crate::storage::cache;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::time::Instant;
use tracing::info;

/// Half-open download window `[start_ms, end_ms)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl FetchWindow {
    /// `lookback_days` ending at `now`
    pub fn trailing(lookback_days: u32, now: DateTime<Utc>) -> Self {
        let start = now - Duration::days(i64::from(lookback_days));
        Self {
            start_ms: start.timestamp_millis(),
            end_ms: now.timestamp_millis(),
        }
    }

    pub fn len_ms(&self) -> i64 {
        (self.end_ms - self.start_ms).max(0)
    }
}

/// Download with the configured client and overwrite the cache, or read the cache back
pub async fn get_historical_data(config: &Config, download: bool) -> Result<CandleTable> {
    get_historical_data_at(config, download, Utc::now()).await
}

/// Same as `get_historical_data` with the window ending at `now`
pub async fn get_historical_data_at(
    config: &Config,
    download: bool,
    now: DateTime<Utc>,
) -> Result<CandleTable> {
    let path = config.data_tmp_path();

    let table = if download {
        let window = FetchWindow::trailing(config.data.lookback_days, now);
        let table = download_candles(config, window).await?;
        cache::save(&table, &path)?;
        table
    } else {
        info!("Loading cached candles from {}", path.display());
        cache::load(&path)?
    };

    info!("Candles:\n{}", table);
    Ok(table)
}

/// Fetch `window` from the exchange with the configured client
pub async fn download_candles(config: &Config, window: FetchWindow) -> Result<CandleTable> {
    let timeframe = config.timeframe()?;
    let limit = config.data.page_limit;

    info!(
        "Downloading {} days of {} candles ({:?} client), {} -> {}, about {} candles",
        config.data.lookback_days,
        timeframe,
        config.data.downloader,
        window.start_ms,
        window.end_ms,
        window.len_ms() / timeframe.duration_ms()
    );

    let started = Instant::now();
    let table = match config.data.downloader {
        DownloaderKind::Direct => {
            let client = BinanceRestClient::new(&config.exchange)?;
            let mut source = DirectDownloader::new(client);
            fetch_historical(&mut source, &config.data.direct_symbol, timeframe, window, limit).await?
        }
        DownloaderKind::Unified => {
            let exchange = UnifiedExchange::binance(&config.exchange)?;
            let mut source = UnifiedDownloader::new(exchange);
            fetch_historical(&mut source, &config.data.unified_symbol, timeframe, window, limit).await?
        }
    };

    info!(
        "{:?} download finished in {:.2?}",
        config.data.downloader,
        started.elapsed()
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_trailing_window() {
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap();
        let window = FetchWindow::trailing(30, now);

        assert_eq!(window.end_ms, now.timestamp_millis());
        assert_eq!(window.len_ms(), 30 * 24 * 3_600_000);
        assert_eq!(
            window.start_ms,
            Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap().timestamp_millis()
        );
    }

    const HOUR_MS: i64 = 3_600_000;

    fn kline(ts: i64, price: f64) -> String {
        format!(
            r#"[{ts}, "{p}", "{h}", "{l}", "{p}", "1.5", {close}, "{q}", 7, "0.5", "{q}", "0"]"#,
            ts = ts,
            p = price,
            h = price + 1.0,
            l = price - 1.0,
            close = ts + HOUR_MS - 1,
            q = price * 1.5,
        )
    }

    fn download_config(root: &std::path::Path, url: String) -> Config {
        let mut config = Config {
            root_path: root.to_path_buf(),
            ..Config::default()
        };
        config.data.lookback_days = 1;
        config.data.page_limit = 2;
        config.exchange.rest_url = url;
        config.exchange.request_delay_ms = 0;
        config
    }

    #[tokio::test]
    async fn test_download_overwrites_cache_and_loads_back() {
        use mockito::Matcher;

        let now = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap().timestamp_millis();
        let end_inclusive = (now.timestamp_millis() - 1).to_string();

        let mut server = mockito::Server::new_async().await;
        let first_page = server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("interval".into(), "1h".into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
                Matcher::UrlEncoded("startTime".into(), start.to_string()),
                Matcher::UrlEncoded("endTime".into(), end_inclusive.clone()),
            ]))
            .with_status(200)
            .with_body(format!("[{},{}]", kline(start, 100.0), kline(start + HOUR_MS, 101.0)))
            .create_async()
            .await;
        let second_page = server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("startTime".into(), (start + HOUR_MS + 1).to_string()),
                Matcher::UrlEncoded("endTime".into(), end_inclusive),
            ]))
            .with_status(200)
            .with_body(format!("[{}]", kline(start + 2 * HOUR_MS, 102.0)))
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = download_config(dir.path(), server.url());

        // stale snapshot that the download must replace
        let stale = CandleTable::from_rows(
            crate::data::CandleLayout::Ohlcv,
            vec![crate::data::Candle::ohlcv(0, 1.0, 1.0, 1.0, 1.0, 1.0)],
        )
        .unwrap();
        cache::save(&stale, &config.data_tmp_path()).unwrap();

        let downloaded = get_historical_data_at(&config, true, now).await.unwrap();
        first_page.assert_async().await;
        second_page.assert_async().await;

        assert_eq!(downloaded.len(), 3);
        assert_eq!(downloaded.layout(), crate::data::CandleLayout::Full);
        assert_eq!(downloaded.first().unwrap().open_time, start);
        assert_eq!(downloaded.last().unwrap().close, 102.0);

        let cached = get_historical_data_at(&config, false, now).await.unwrap();
        assert_eq!(cached, downloaded);
    }

    #[tokio::test]
    async fn test_download_error_leaves_cache_untouched() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v3/klines")
            .match_query(mockito::Matcher::Any)
            .with_status(418)
            .with_body(r#"{"code": -1003, "msg": "Way too many requests."}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = download_config(dir.path(), server.url());
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();

        let err = get_historical_data_at(&config, true, now).await.unwrap_err();
        assert!(err.to_string().contains("Way too many requests."));
        assert!(!config.data_tmp_path().exists());
    }

    #[tokio::test]
    async fn test_load_missing_cache_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            root_path: dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(get_historical_data(&config, false).await.is_err());
    }
}
