//! Paginated candle download
//!
//! Both exchange clients are driven by the same cursor loop: request a page
//! from the cursor, move the cursor to the page's last open time + 1 ms, and
//! stop on an empty page, a short page, or once the cursor leaves the window.

use crate::api::{BinanceRestClient, UnifiedExchange};
use crate::data::{Candle, CandleLayout, CandleTable, FetchWindow, Timeframe};
use anyhow::Result;
use tracing::{debug, info, warn};

/// Parameters for one page request
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub symbol: &'a str,
    pub timeframe: Timeframe,
    pub since: i64,
    /// Exclusive end of the wanted window
    pub end_ms: i64,
    pub limit: usize,
}

/// Something that serves candle pages
#[allow(async_fn_in_trait)]
pub trait KlineSource {
    fn layout(&self) -> CandleLayout;

    async fn fetch_page(&mut self, request: &PageRequest<'_>) -> Result<Vec<Candle>>;
}

/// Concatenate every page covering `window`, ascending and without duplicates
pub async fn fetch_historical<S: KlineSource>(
    source: &mut S,
    symbol: &str,
    timeframe: Timeframe,
    window: FetchWindow,
    limit: usize,
) -> Result<CandleTable> {
    let mut table = CandleTable::empty(source.layout());
    let mut cursor = window.start_ms;
    let mut pages = 0usize;

    while cursor < window.end_ms {
        let request = PageRequest {
            symbol,
            timeframe,
            since: cursor,
            end_ms: window.end_ms,
            limit,
        };

        let mut page = source.fetch_page(&request).await?;
        pages += 1;

        if page.is_empty() {
            break;
        }

        page.sort_by_key(|c| c.open_time);
        let page_len = page.len();
        let last_ts = page[page_len - 1].open_time;
        let kept = table.append_page(page, window.end_ms)?;

        debug!(
            "Page {}: {} rows from {} ({} kept)",
            pages, page_len, cursor, kept
        );

        let next = last_ts + 1;
        if next <= cursor {
            warn!("Page ending at {} did not advance cursor {}, stopping", last_ts, cursor);
            break;
        }
        cursor = next;

        if page_len < limit {
            break;
        }
    }

    info!(
        "Downloaded {} candles for {} {} in {} pages",
        table.len(),
        symbol,
        timeframe,
        pages
    );
    Ok(table)
}

/// Direct REST client; returns the full kline layout
pub struct DirectDownloader {
    client: BinanceRestClient,
}

impl DirectDownloader {
    pub fn new(client: BinanceRestClient) -> Self {
        Self { client }
    }
}

impl KlineSource for DirectDownloader {
    fn layout(&self) -> CandleLayout {
        CandleLayout::Full
    }

    async fn fetch_page(&mut self, request: &PageRequest<'_>) -> Result<Vec<Candle>> {
        // endTime is inclusive on the exchange side
        self.client
            .get_klines(
                request.symbol,
                request.timeframe,
                Some(request.since),
                Some(request.end_ms - 1),
                request.limit,
            )
            .await
    }
}

/// Unified exchange API; returns OHLCV only
pub struct UnifiedDownloader {
    exchange: UnifiedExchange,
}

impl UnifiedDownloader {
    pub fn new(exchange: UnifiedExchange) -> Self {
        Self { exchange }
    }
}

impl KlineSource for UnifiedDownloader {
    fn layout(&self) -> CandleLayout {
        CandleLayout::Ohlcv
    }

    async fn fetch_page(&mut self, request: &PageRequest<'_>) -> Result<Vec<Candle>> {
        let rows = self
            .exchange
            .fetch_ohlcv(
                request.symbol,
                request.timeframe.as_str(),
                Some(request.since),
                request.limit,
            )
            .await?;
        Ok(rows.into_iter().map(Candle::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: i64 = 3_600_000;

    /// Serves pages from an in-memory history
    struct MockSource {
        history: Vec<Candle>,
        calls: usize,
        /// Re-send the candle before `since` at the start of each page
        overlap: bool,
        /// Honour the request's end bound like the direct endpoint does
        bounded: bool,
    }

    impl MockSource {
        fn new(count: usize) -> Self {
            let history = (0..count)
                .map(|i| {
                    let p = 100.0 + i as f64;
                    Candle::ohlcv(i as i64 * STEP, p, p + 1.0, p - 1.0, p + 0.5, 1.0)
                })
                .collect();
            Self {
                history,
                calls: 0,
                overlap: false,
                bounded: false,
            }
        }
    }

    impl KlineSource for MockSource {
        fn layout(&self) -> CandleLayout {
            CandleLayout::Ohlcv
        }

        async fn fetch_page(&mut self, request: &PageRequest<'_>) -> Result<Vec<Candle>> {
            self.calls += 1;
            let since = if self.overlap {
                request.since - STEP
            } else {
                request.since
            };
            Ok(self
                .history
                .iter()
                .filter(|c| c.open_time >= since)
                .filter(|c| !self.bounded || c.open_time < request.end_ms)
                .take(request.limit)
                .copied()
                .collect())
        }
    }

    fn window(start: i64, end: i64) -> FetchWindow {
        FetchWindow {
            start_ms: start,
            end_ms: end,
        }
    }

    #[tokio::test]
    async fn test_pagination_covers_range() {
        let mut source = MockSource::new(2500);
        source.bounded = true;
        let table = fetch_historical(&mut source, "BTCUSDT", Timeframe::H1, window(0, 2500 * STEP), 1000)
            .await
            .unwrap();

        assert_eq!(table.len(), 2500);
        assert!(table.is_strictly_ascending());
        assert_eq!(table.first().unwrap().open_time, 0);
        assert_eq!(table.last().unwrap().open_time, 2499 * STEP);
        // 1000 + 1000 + 500 (short page ends it)
        assert_eq!(source.calls, 3);
    }

    #[tokio::test]
    async fn test_unbounded_source_trimmed_to_window() {
        let mut source = MockSource::new(3000);
        let table = fetch_historical(&mut source, "BTC/USDT", Timeframe::H1, window(10 * STEP, 1210 * STEP), 500)
            .await
            .unwrap();

        assert_eq!(table.len(), 1200);
        assert_eq!(table.first().unwrap().open_time, 10 * STEP);
        assert_eq!(table.last().unwrap().open_time, 1209 * STEP);
        assert!(table.is_strictly_ascending());
    }

    #[tokio::test]
    async fn test_overlapping_pages_not_duplicated() {
        let mut source = MockSource::new(1500);
        source.overlap = true;
        source.bounded = true;
        let table = fetch_historical(&mut source, "BTCUSDT", Timeframe::H1, window(0, 1500 * STEP), 400)
            .await
            .unwrap();

        assert_eq!(table.len(), 1500);
        assert!(table.is_strictly_ascending());
    }

    #[tokio::test]
    async fn test_exact_multiple_terminates() {
        let mut source = MockSource::new(2000);
        let table = fetch_historical(&mut source, "BTCUSDT", Timeframe::H1, window(0, 5000 * STEP), 1000)
            .await
            .unwrap();

        assert_eq!(table.len(), 2000);
        // two full pages, then an empty one
        assert_eq!(source.calls, 3);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let mut source = MockSource::new(0);
        let table = fetch_historical(&mut source, "BTCUSDT", Timeframe::H1, window(0, STEP), 1000)
            .await
            .unwrap();

        assert!(table.is_empty());
        assert_eq!(source.calls, 1);
    }

    #[tokio::test]
    async fn test_empty_window_makes_no_requests() {
        let mut source = MockSource::new(10);
        let table = fetch_historical(&mut source, "BTCUSDT", Timeframe::H1, window(STEP, STEP), 1000)
            .await
            .unwrap();

        assert!(table.is_empty());
        assert_eq!(source.calls, 0);
    }
}
